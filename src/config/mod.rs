//! Configuration loading and validation utilities.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use serde::Deserialize;
use tokio::fs;
use tracing::instrument;

use crate::{inpaint::Algorithm, RemovalError};

/// Command-line arguments used to bootstrap the runtime.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "subscrub subtitle removal engine")]
pub struct CliArgs {
    /// Location of the policy document.
    #[arg(long, value_name = "PATH", default_value = "policy.toml")]
    pub policy: PathBuf,
    /// Location of the model registry document.
    #[arg(long, value_name = "PATH", default_value = "models.toml")]
    pub models: PathBuf,
    /// Inpainting algorithm for the dry-run job.
    #[arg(long, value_name = "ALGO", env = "SUBSCRUB_ALGORITHM")]
    pub algorithm: Option<Algorithm>,
    /// Worker ceiling override.
    #[arg(long, value_name = "COUNT", env = "SUBSCRUB_WORKERS")]
    pub workers: Option<u32>,
    /// Frame width override for synthetic dry-run input.
    #[arg(long, value_name = "WIDTH", env = "SUBSCRUB_WIDTH")]
    pub width: Option<u32>,
    /// Frame height override for synthetic dry-run input.
    #[arg(long, value_name = "HEIGHT", env = "SUBSCRUB_HEIGHT")]
    pub height: Option<u32>,
    /// Number of synthetic frames to push through the dry-run job.
    #[arg(long, value_name = "FRAMES", env = "SUBSCRUB_DRY_RUN_FRAMES")]
    pub dry_run_frames: Option<u64>,
    /// Subtitle regions as x1,y1,x2,y2 quadruples (repeatable).
    #[arg(long = "region", value_name = "X1,Y1,X2,Y2")]
    pub regions: Vec<String>,
}

/// Limits enforced at runtime.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PolicyLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_frames_per_task: u64,
    /// Per-frame device memory budget in megabytes.
    pub max_frame_mb: f32,
}

/// Worker-pool and external-call policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkerPolicy {
    pub max_concurrent_tasks: u32,
    pub detect_timeout_ms: u64,
    pub inpaint_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub retention_hours: u64,
}

impl WorkerPolicy {
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn inpaint_timeout(&self) -> Duration {
        Duration::from_millis(self.inpaint_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

/// Region-matching and mask-construction defaults.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MatcherDefaults {
    /// Fraction of a detected box that must fall inside one region;
    /// zero selects center-point containment.
    pub min_overlap: f32,
    pub mask_margin_px: u32,
    /// Boxes taller than wide by more than this slack are discarded as
    /// false detections. Absent disables the filter.
    pub vertical_slack_px: Option<u32>,
}

/// Default dimensions used when synthesizing dry-run input.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RuntimeDefaults {
    pub algorithm: Algorithm,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub dry_run_frames: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct PolicyDocument {
    pub limits: PolicyLimits,
    pub workers: WorkerPolicy,
    pub matcher: MatcherDefaults,
    pub defaults: RuntimeDefaults,
}

/// Registered inpainting model metadata.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModelRegistry {
    pub models: Vec<ModelRecord>,
}

/// A single model artifact entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModelRecord {
    pub algorithm: Algorithm,
    pub version: String,
    pub path: PathBuf,
    #[serde(rename = "checksum_sha256")]
    pub checksum: String,
}

impl ModelRegistry {
    pub fn validate(&self) -> Result<(), RemovalError> {
        for model in &self.models {
            if model.checksum.len() != 64
                || !model
                    .checksum
                    .chars()
                    .all(|c| matches!(c, '0'..='9' | 'a'..='f' | 'A'..='F'))
            {
                return Err(RemovalError::Config(format!(
                    "invalid checksum for {} model {}",
                    model.algorithm, model.version
                )));
            }
            if model.path.as_os_str().is_empty() {
                return Err(RemovalError::Config(format!(
                    "{} model {} missing artifact path",
                    model.algorithm, model.version
                )));
            }
        }
        Ok(())
    }

    /// Looks up the artifact record backing an algorithm.
    pub fn record_for(&self, algorithm: Algorithm) -> Option<&ModelRecord> {
        self.models.iter().find(|m| m.algorithm == algorithm)
    }
}

/// Fully merged configuration set passed explicitly into the scheduler.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cli: CliArgs,
    pub limits: PolicyLimits,
    pub workers: WorkerPolicy,
    pub matcher: MatcherDefaults,
    pub defaults: RuntimeDefaults,
    pub models: ModelRegistry,
}

impl AppConfig {
    #[instrument(skip_all)]
    pub async fn load(cli: CliArgs) -> Result<Self, RemovalError> {
        let policy_raw = fs::read_to_string(&cli.policy)
            .await
            .map_err(|err| RemovalError::Config(format!("failed to read policy: {err}")))?;
        let policy_doc: PolicyDocument = toml::from_str(&policy_raw)
            .map_err(|err| RemovalError::Config(format!("invalid policy document: {err}")))?;

        let models_raw = fs::read_to_string(&cli.models)
            .await
            .map_err(|err| RemovalError::Config(format!("failed to read models: {err}")))?;
        let models: ModelRegistry = toml::from_str(&models_raw)
            .map_err(|err| RemovalError::Config(format!("invalid models document: {err}")))?;
        models.validate()?;

        let mut workers = policy_doc.workers.clone();
        if let Some(ceiling) = cli.workers {
            workers.max_concurrent_tasks = ceiling;
        }
        if workers.max_concurrent_tasks == 0 {
            return Err(RemovalError::Config(
                "worker ceiling must be positive".to_string(),
            ));
        }
        if workers.max_attempts == 0 {
            return Err(RemovalError::Config(
                "retry attempt budget must be positive".to_string(),
            ));
        }

        let matcher = policy_doc.matcher.clone();
        if !(0.0..=1.0).contains(&matcher.min_overlap) {
            return Err(RemovalError::Config(format!(
                "min_overlap {} outside [0, 1]",
                matcher.min_overlap
            )));
        }

        let mut defaults = policy_doc.defaults.clone();
        if let Some(algorithm) = cli.algorithm {
            defaults.algorithm = algorithm;
        }
        if models.record_for(defaults.algorithm).is_none() {
            return Err(RemovalError::Config(format!(
                "no model registered for algorithm {}",
                defaults.algorithm
            )));
        }
        defaults.width = cli.width.unwrap_or(defaults.width);
        if defaults.width > policy_doc.limits.max_width {
            return Err(RemovalError::Config(format!(
                "width {} exceeds policy cap {}",
                defaults.width, policy_doc.limits.max_width
            )));
        }
        defaults.height = cli.height.unwrap_or(defaults.height);
        if defaults.height > policy_doc.limits.max_height {
            return Err(RemovalError::Config(format!(
                "height {} exceeds policy cap {}",
                defaults.height, policy_doc.limits.max_height
            )));
        }
        defaults.dry_run_frames = cli
            .dry_run_frames
            .unwrap_or(defaults.dry_run_frames)
            .min(policy_doc.limits.max_frames_per_task)
            .max(1);

        Ok(Self {
            cli,
            limits: policy_doc.limits,
            workers,
            matcher,
            defaults,
            models,
        })
    }
}

//! Hosted vision-language detector client.
//!
//! The remote service is rate- and latency-bounded: every call carries an
//! explicit timeout, failures are retried a bounded number of times with
//! exponential backoff, and responses are cached per distinct image so a
//! video never pays for more than one call per layout.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{
    config::WorkerPolicy, region::DetectedBox, Frame, RemovalError, RemovalResult,
};

use super::TextDetector;

/// External token-management collaborator supplying bearer tokens for the
/// vision service. Refresh cadence and storage are its concern, not ours.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> RemovalResult<String>;

    /// Forces a refresh after the service rejects the current token.
    async fn force_refresh(&self) -> RemovalResult<String>;
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: String,
    width: u32,
    height: u32,
    checksum: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    regions: Vec<RemoteBox>,
}

#[derive(Deserialize)]
struct RemoteBox {
    y_min: u32,
    y_max: u32,
    x_min: u32,
    x_max: u32,
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f32,
}

/// Remote detector invoking the hosted vision service over HTTP(S).
pub struct RemoteVisionDetector {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
    max_attempts: u32,
    backoff: Duration,
    cache: Mutex<HashMap<String, Arc<Vec<DetectedBox>>>>,
}

impl RemoteVisionDetector {
    pub fn new(
        endpoint: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        policy: &WorkerPolicy,
    ) -> RemovalResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(policy.detect_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| RemovalError::Config(format!("http client: {err}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            tokens,
            max_attempts: policy.max_attempts.max(1),
            backoff: policy.retry_backoff(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, checksum: &str) -> Option<Arc<Vec<DetectedBox>>> {
        self.cache
            .lock()
            .expect("detector cache mutex poisoned")
            .get(checksum)
            .cloned()
    }

    fn store(&self, checksum: &str, boxes: Arc<Vec<DetectedBox>>) {
        self.cache
            .lock()
            .expect("detector cache mutex poisoned")
            .insert(checksum.to_string(), boxes);
    }

    async fn call_once(&self, frame: &Frame, token: &str) -> RemovalResult<CallOutcome> {
        let request = DetectRequest {
            image: STANDARD.encode(&frame.data),
            width: frame.metadata.width,
            height: frame.metadata.height,
            checksum: &frame.metadata.checksum,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Ok(CallOutcome::AuthRejected),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                Err(RemovalError::Transient {
                    stage: "detect",
                    detail: format!("vision service returned {status}"),
                })
            }
            status if !status.is_success() => Err(RemovalError::Fatal {
                stage: "detect",
                detail: format!("vision service returned {status}"),
            }),
            _ => {
                let body: DetectResponse = response.json().await.map_err(|err| {
                    RemovalError::Fatal {
                        stage: "detect",
                        detail: format!("unparseable detection response: {err}"),
                    }
                })?;
                Ok(CallOutcome::Boxes(
                    body.regions
                        .into_iter()
                        .map(|b| DetectedBox {
                            y_min: b.y_min,
                            y_max: b.y_max,
                            x_min: b.x_min,
                            x_max: b.x_max,
                            text: b.text,
                            confidence: b.confidence,
                        })
                        .collect(),
                ))
            }
        }
    }
}

/// Outcome of a single service call, separating auth rejection (handled by
/// a forced token refresh) from retryable failures.
enum CallOutcome {
    Boxes(Vec<DetectedBox>),
    AuthRejected,
}

#[async_trait]
impl TextDetector for RemoteVisionDetector {
    #[instrument(skip_all, fields(checksum = %frame.metadata.checksum))]
    async fn detect(&self, frame: &Frame) -> RemovalResult<Vec<DetectedBox>> {
        if let Some(boxes) = self.cached(&frame.metadata.checksum) {
            return Ok(boxes.as_ref().clone());
        }

        let mut token = self.tokens.token().await?;
        let mut last_error = RemovalError::Transient {
            stage: "detect",
            detail: "remote detection attempts exhausted".to_string(),
        };
        for attempt in 1..=self.max_attempts {
            match self.call_once(frame, &token).await {
                Ok(CallOutcome::Boxes(boxes)) => {
                    let shared = Arc::new(boxes);
                    self.store(&frame.metadata.checksum, shared.clone());
                    return Ok(shared.as_ref().clone());
                }
                Ok(CallOutcome::AuthRejected) if attempt < self.max_attempts => {
                    warn!(target = "detect", attempt, "vision token rejected, forcing refresh");
                    token = self.tokens.force_refresh().await?;
                }
                Ok(CallOutcome::AuthRejected) => {
                    return Err(RemovalError::Fatal {
                        stage: "detect",
                        detail: "vision service rejected refreshed token".to_string(),
                    });
                }
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(target = "detect", attempt, error = %err, "remote detection retry");
                    tokio::time::sleep(retry_delay(self.backoff, attempt)).await;
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error)
    }
}

/// Exponential backoff doubling per attempt, capped at 30 seconds.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << (attempt - 1).min(16))
        .min(Duration::from_secs(30))
}

fn classify_transport_error(err: &reqwest::Error) -> RemovalError {
    if err.is_timeout() {
        RemovalError::Transient {
            stage: "detect",
            detail: "vision service call timed out".to_string(),
        }
    } else if err.is_connect() {
        RemovalError::Transient {
            stage: "detect",
            detail: format!("vision service unreachable: {err}"),
        }
    } else {
        RemovalError::Fatal {
            stage: "detect",
            detail: format!("vision service transport failure: {err}"),
        }
    }
}

//! CLI entry point driving a synthetic dry-run job through the scheduler.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subscrub::{
    config::{AppConfig, CliArgs},
    detect::ScriptedDetector,
    inpaint::BackendSet,
    media::{CollectSink, SyntheticSource},
    region::DetectedBox,
    scheduler::{Job, JobOverrides, TaskScheduler},
    RemovalError,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = CliArgs::parse();
    let config = AppConfig::load(cli).await?;
    let regions = parse_regions(&config.cli.regions)?;

    // Script a subtitle line across the lower quarter of the synthetic
    // frames so the dry run exercises matching and mask construction.
    let width = config.defaults.width;
    let height = config.defaults.height;
    let detector = ScriptedDetector::with_boxes(vec![DetectedBox {
        y_min: height * 3 / 4,
        y_max: height * 3 / 4 + 40,
        x_min: width / 4,
        x_max: width * 3 / 4,
        text: "synthetic subtitle".to_string(),
        confidence: 0.98,
    }]);

    let scheduler = TaskScheduler::new(config.clone(), Arc::new(detector), BackendSet::passthrough());

    let sink = CollectSink::new();
    let output = sink.handle();
    let task_id = scheduler.submit(Job {
        source: Box::new(SyntheticSource::new(
            config.defaults.dry_run_frames,
            width,
            height,
            config.defaults.channels,
        )),
        sink: Box::new(sink),
        regions,
        algorithm: config.defaults.algorithm,
        auto_detect: false,
        overrides: JobOverrides::default(),
    })?;

    loop {
        let view = scheduler.status(&task_id)?;
        if view.state.is_terminal() {
            println!("{}", serde_json::to_string_pretty(&view)?);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let frames = output.lock().expect("sink mutex poisoned").len();
    tracing::info!(frames, "dry run finished");
    Ok(())
}

/// Parses repeated `--region x1,y1,x2,y2` arguments into corner quadruples.
fn parse_regions(raw: &[String]) -> Result<Vec<[i64; 4]>, RemovalError> {
    let mut regions = Vec::with_capacity(raw.len());
    for spec in raw {
        let coords: Vec<i64> = spec
            .split(',')
            .map(|part| part.trim().parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|err| RemovalError::Validation(format!("region '{spec}': {err}")))?;
        let quad: [i64; 4] = coords.try_into().map_err(|_| {
            RemovalError::Validation(format!("region '{spec}' needs exactly 4 coordinates"))
        })?;
        regions.push(quad);
    }
    Ok(regions)
}

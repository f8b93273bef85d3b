use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pulse_monitor::{
    TimeseriesDataPoint,
    actors::{MonitorHandle, MonitorOptions},
    config::{StorageConfig, read_config_file},
    events::LogSink,
    storage::MemoryBackend,
};
use serde::Deserialize;
use tracing::{debug, error, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Feed recorded samples through the monitors of a config file and print the
/// resulting alert events as JSON lines.
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Samples file, one JSON object per line
    #[arg(short)]
    samples: String,

    /// Print the status of every entity when done
    #[arg(long)]
    status: bool,
}

#[derive(Debug, Deserialize)]
struct SampleLine {
    entity: String,
    metric: String,
    ts: i64,
    value: f64,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("pulse_monitor", LevelFilter::DEBUG),
        ("pulse_replay", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let store = match config.storage.clone().unwrap_or_default() {
        StorageConfig::Memory => Some(Arc::new(MemoryBackend::new())),
        StorageConfig::None => None,
    };

    let mut monitors = HashMap::new();
    for entity in &config.entities {
        let mut options =
            MonitorOptions::new(config.subscription_buffer).with_sink(Arc::new(LogSink));
        if let Some(store) = &store {
            options = options.with_store(store.clone());
        }

        let first_ts = first_timestamp(&args.samples, &entity.id)?.unwrap_or_default();
        let handle = MonitorHandle::spawn_entity(entity, options, first_ts)
            .await
            .with_context(|| format!("failed to start monitor for {}", entity.id))?;
        debug!("started monitor for {}", entity.id);
        monitors.insert(entity.id.clone(), handle);
    }

    let file = std::fs::File::open(&args.samples)
        .with_context(|| format!("cannot open {}", args.samples))?;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let sample: SampleLine = match serde_json::from_str(&line) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("line {}: {e}", number + 1);
                continue;
            }
        };

        let Some(monitor) = monitors.get(&sample.entity) else {
            warn!("line {}: unknown entity {}", number + 1, sample.entity);
            continue;
        };

        let report = match monitor
            .sample(&sample.metric, TimeseriesDataPoint::new(sample.ts, sample.value))
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!("line {}: {e}", number + 1);
                continue;
            }
        };

        for failure in &report.failures {
            error!("{}: {failure}", sample.entity);
        }
        for event in &report.events {
            println!("{}", serde_json::to_string(event)?);
        }
    }

    for monitor in monitors.values() {
        if args.status {
            let status = monitor.status().await?;
            println!("{}", serde_json::to_string(&status)?);
        }
        monitor.shutdown().await?;
    }

    Ok(())
}

/// Timestamp of the first sample of `entity`, used to align its windows.
fn first_timestamp(path: &str, entity: &str) -> anyhow::Result<Option<i64>> {
    let file = std::fs::File::open(path).with_context(|| format!("cannot open {path}"))?;
    for line in BufReader::new(file).lines() {
        if let Ok(sample) = serde_json::from_str::<SampleLine>(&line?)
            && sample.entity == entity
        {
            return Ok(Some(sample.ts));
        }
    }
    Ok(None)
}

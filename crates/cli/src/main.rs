mod cli;
mod config;
mod probe;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use clipdeck_admission::Pipeline;
use clipdeck_core::{Fingerprint, PipelineConfig, ProcessingError};
use futures::future::join_all;
use tracing::{info, warn};

use crate::cli::{CliArgs, Command, ConfigArgs, ProbeArgs};
use crate::probe::{decode_report, ImageProbe};

#[tokio::main]
async fn main() -> Result<()> {
    clipdeck_core::config::load_dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let (config, config_path) =
        config::load(args.config.as_deref()).context("failed to load configuration")?;

    match args.command {
        Command::Probe(probe_args) => run_probe(config, probe_args).await,
        Command::Config(ConfigArgs { write }) => {
            print!("{}", config::to_toml(&config)?);
            if write {
                config::write(&config, &config_path)?;
                info!(path = %config_path.display(), "config written");
            }
            Ok(())
        }
    }
}

async fn run_probe(mut config: PipelineConfig, args: ProbeArgs) -> Result<()> {
    if args.no_cache {
        config.cache.enabled = false;
    }
    config.log_summary();

    let pipeline = Arc::new(
        Pipeline::builder(config)
            .processor(ImageProbe)
            .build()
            .context("failed to start pipeline")?,
    );

    // Every file is submitted at once; admission decides the order.
    let tasks = args.files.iter().map(|path| {
        let pipeline = Arc::clone(&pipeline);
        let priority = args.priority;
        async move {
            let data = match tokio::fs::read(path).await {
                Ok(data) => data,
                Err(e) => return (path, Err(ProcessingError::Io(e))),
            };
            let fingerprint = Fingerprint::of(&data);
            let result = pipeline.submit(data, priority, Some(fingerprint)).await;
            (path, result)
        }
    });

    let mut failures = 0usize;
    for (path, result) in join_all(tasks).await {
        match result.map(|bytes| decode_report(&bytes)) {
            Ok(Ok(report)) => println!("{}\t{}", path.display(), report),
            Ok(Err(e)) => {
                failures += 1;
                println!("{}\terror: malformed probe output: {}", path.display(), e);
            }
            Err(e) => {
                failures += 1;
                println!("{}\terror[{}]: {}", path.display(), e.kind(), e);
            }
        }
    }

    let metrics = pipeline.metrics();
    metrics.log_summary();
    if args.metrics {
        println!(
            "{}",
            serde_json::to_string_pretty(&metrics).context("failed to serialize metrics")?
        );
    }
    pipeline.shutdown();

    check_failures(failures, args.files.len())
}

fn check_failures(failures: usize, total: usize) -> Result<()> {
    if failures > 0 {
        warn!(failures, total, "some files could not be probed");
        anyhow::bail!("{failures} of {total} files could not be probed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_failed_file_fails_the_run() {
        assert!(check_failures(0, 3).is_ok());
        let err = check_failures(1, 3).unwrap_err();
        assert_eq!(err.to_string(), "1 of 3 files could not be probed");
    }
}

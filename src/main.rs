// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use dnschain::{
    client::KubeClientFactory,
    config::{Cli, Command, Config},
    constants::TOKIO_WORKER_THREADS,
    metrics::gather_metrics,
    pipeline::Pipeline,
};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("dnschain")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    info!(command = ?cli.command, "Starting dnschain");

    let result = tokio::select! {
        result = run(&cli) => result,
        signal = shutdown_signal() => {
            let signal = signal?;
            warn!(
                signal,
                "Interrupted; probe pods created by the current stage may need manual cleanup"
            );
            Err(anyhow::anyhow!("interrupted by {signal}"))
        }
    };

    if let Some(path) = &cli.config.metrics_output {
        if let Err(e) = write_metrics(path) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics");
        }
    }

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "dnschain failed");
    }
    result
}

/// Initialize logging.
///
/// Format: timestamp file:line LEVEL message. Respects `RUST_LOG` (default `info`) and
/// `RUST_LOG_FORMAT=json|text`.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    debug!("Logging initialized with file and line number tracking");
}

async fn run(cli: &Cli) -> Result<()> {
    let pipeline = build_pipeline(&cli.config)?;

    let report = match cli.command {
        Command::Prerequisites => render_report(&pipeline.run_prerequisites().await?)?,
        Command::Chain => render_report(&pipeline.run_chain().await?)?,
        Command::Verify { mode } => render_report(&pipeline.run_verify(mode).await?)?,
    };

    println!("{report}");
    info!("dnschain completed successfully");
    Ok(())
}

fn build_pipeline(config: &Config) -> Result<Pipeline<KubeClientFactory>> {
    let factory = KubeClientFactory::new(config.probe_image.clone());
    Ok(Pipeline::new(
        factory,
        config.access_settings()?,
        config.namespace_lists(),
        config.settings()?,
    ))
}

/// Render a stage report as pretty JSON for stdout.
fn render_report<T: Serialize>(report: &T) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}

fn write_metrics(path: &Path) -> Result<()> {
    let metrics = gather_metrics().context("Failed to gather metrics")?;
    std::fs::write(path, metrics)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    debug!(path = %path.display(), "Metrics written");
    Ok(())
}

/// Wait for SIGINT or, on Unix, SIGTERM. Returns the name of the signal received.
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT")
            }
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT")
    }
}

//! Sidekick gateway - forwards KubeArmor alerts to configured outputs
//!
//! ## Usage
//!
//! ```bash
//! SPYDERBAT_ORGUID=myorg SPYDERBAT_APIKEY=... cargo run
//!
//! # Print every event instead of (or in addition to) forwarding it
//! SIDEKICK_STDOUT=true cargo run
//! ```
//!
//! ## Environment Variables
//!
//! - `SIDEKICK_LISTEN_ADDR`: ingest/metrics server address (default: "0.0.0.0:2801")
//! - `SIDEKICK_LOG_LEVEL`: log level (default: "info", overridden by `RUST_LOG`)
//! - `SIDEKICK_LOG_FORMAT`: "pretty" or "json" (default: "pretty")
//! - `SIDEKICK_METRICS_QUEUE_CAPACITY`: pending count samples (default: 1024)
//! - `SIDEKICK_STDOUT`: enable the stdout output (default: false)
//! - `SIDEKICK_STDOUT_FORMAT`: "json" or "pretty" stdout rendering (default: "json")
//! - `SPYDERBAT_*`: Spyderbat output settings, enabled when ORGUID and APIKEY are set

use sidekick_gateway::config::{Config, TextFormat};
use sidekick_gateway::metrics::{Metrics, MetricsQueue, PrometheusCountSink};
use sidekick_gateway::registry::OutputRegistry;
use sidekick_gateway::server::{self, AppState};
use sidekick_gateway::stats::Statistics;
use sidekick_gateway::{SpyderbatOutput, StdoutOutput};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    info!(
        listen_addr = %config.listen_addr,
        spyderbat = config.spyderbat.is_enabled(),
        stdout = config.stdout,
        "Starting sidekick gateway"
    );

    Metrics::init()?;
    let statistics = Arc::new(Statistics::new());

    let (metrics_queue, metrics_worker) = MetricsQueue::new(config.metrics_queue_capacity);
    let metrics_handle = tokio::spawn(metrics_worker.run(Arc::new(PrometheusCountSink)));

    let mut registry = OutputRegistry::new();

    if config.spyderbat.is_enabled() {
        match SpyderbatOutput::new(
            &config.spyderbat,
            statistics.for_output("spyderbat"),
            metrics_queue.clone(),
        )
        .await
        {
            Ok(output) => {
                info!(endpoint = %output.endpoint(), "Spyderbat output ready");
                registry.register_output(Arc::new(output));
            }
            Err(e) => error!(error = %e, "Spyderbat output disabled"),
        }
    }

    if config.stdout {
        let output = StdoutOutput::with_format(config.stdout_format, statistics.for_output("stdout"));
        registry.register_output(Arc::new(output));
    }

    if registry.output_count() == 0 {
        anyhow::bail!("no output could be enabled, check the SPYDERBAT_* and SIDEKICK_STDOUT settings");
    }

    let state = AppState {
        registry: Arc::new(registry),
        statistics,
    };
    server::serve(config.listen_addr, state, shutdown_signal()).await?;

    // Dropping the last queue handle lets the worker drain and stop
    drop(metrics_queue);
    if let Err(e) = metrics_handle.await {
        error!(error = %e, "Metrics worker failed");
    }

    info!("Sidekick gateway shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        TextFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        TextFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

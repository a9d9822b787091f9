use clap::Parser;
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod config;

const METRICS_PREFIX: &str = "signal_relay";

/// Relays trading-signal webhooks to a local application.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// YAML config file. Settings are read from the environment when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum MainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid Sentry DSN: {0}")]
    InvalidDsn(String),
    #[error("could not set up statsd: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
    #[error(transparent)]
    Relay(#[from] relay::errors::RelayError),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("signal-relay: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), MainError> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    // Sentry has to be up before the runtime starts
    let _sentry = init_sentry(&config.common.logging)?;
    init_logging(&config.common.logging);

    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    tracing::info!(
        port = config.relay.listener.port,
        downstream = %config.relay.downstream.url,
        "Starting signal-relay"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(relay::errors::RelayError::from)?;

    runtime.block_on(relay::run(config.relay))?;
    Ok(())
}

fn init_sentry(logging: &LoggingConfig) -> Result<Option<sentry::ClientInitGuard>, MainError> {
    let Some(dsn) = &logging.sentry_dsn else {
        return Ok(None);
    };
    let dsn = dsn
        .parse::<sentry::types::Dsn>()
        .map_err(|e| MainError::InvalidDsn(format!("{e}")))?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        release: sentry::release_name!(),
        ..Default::default()
    });
    Ok(Some(guard))
}

fn init_logging(logging: &LoggingConfig) {
    let default_level = if logging.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), MainError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.clone(), metrics.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|_| MainError::RecorderInstalled)?;
    shared::metrics_defs::describe_all(relay::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}

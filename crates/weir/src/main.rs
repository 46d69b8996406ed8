//! Weir - multi-tenant log aggregation ingress and router
//!
//! # Usage
//!
//! ```bash
//! # Run with the default config file
//! weir
//!
//! # Explicit config and verbose logging
//! weir --config /etc/weir/weir.toml --log-level debug
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use weir_config::{Config, LogFormat};
use weir_ingress::{tls, IngressListener};
use weir_protocol::EnvelopeCodec;
use weir_router::MessageRouter;

/// Weir - multi-tenant log aggregation ingress and router
#[derive(Parser, Debug)]
#[command(name = "weir")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "weir.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or_else(|| config.log.level.as_str());
    init_logging(level, config.log.format)?;

    let tls_config = match &config.ingress.tls {
        Some(tls_config) => Some(
            tls::build_server_config(
                &tls_config.cert_file,
                &tls_config.key_file,
                tls_config.ca_file.as_deref(),
            )
            .context("building listener tls configuration")?,
        ),
        None => None,
    };

    let router = MessageRouter::new(
        config.router.max_retained_log_messages,
        config.router.skip_cert_verify,
    );
    let router_handle = router.handle();
    tokio::spawn(router.run());

    let listener = Arc::new(
        IngressListener::new(
            &config.ingress.context_name,
            &config.ingress.address,
            tls_config,
            Arc::new(EnvelopeCodec::new()),
            router_handle.envelope_sender(),
        )
        .await
        .context("binding ingress listener")?,
    );

    tracing::info!(
        address = %listener.address(),
        tls = config.ingress.tls.is_some(),
        "weir accepting log envelopes"
    );

    let accept_loop = tokio::spawn(Arc::clone(&listener).start());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutting down");

    listener.stop().await;
    accept_loop.await.context("joining accept loop")?;

    Ok(())
}

/// Initialize the tracing subscriber
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {e}"))?;

    match format {
        LogFormat::Console => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
    }

    Ok(())
}

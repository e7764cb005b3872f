use std::sync::Arc;

use clap::Parser;
use formex_bus::RedisConnector;
use formex_core::RelayConfig;
use formex_relay::RelayService;
use tracing::{error, info};

/// Real-time content relay: webhook in, Redis pub/sub across instances,
/// WebSocket fan-out to browsers.
#[derive(Debug, Parser)]
#[command(name = "formex-relay", version, about)]
struct Cli {
    /// TOML config file (falls back to FORMEX_CONFIG). Environment variables
    /// PORT, REDIS_URL and REDIS_CHANNEL override it.
    #[arg(long)]
    config: Option<String>,

    /// Listen port, overriding PORT and the config file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "formex_relay=info,formex_bus=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > FORMEX_CONFIG > defaults, env on top
    let config_path = cli.config.or_else(|| std::env::var("FORMEX_CONFIG").ok());
    let mut config = RelayConfig::load(config_path.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let connector = Arc::new(RedisConnector::open(&config.redis_url)?);
    let mut service = RelayService::new(config, connector);

    // no relay without a bus: fan-out across instances depends on it
    let addr = service
        .start()
        .await
        .inspect_err(|e| error!(code = e.code(), error = %e, "relay failed to start"))?;
    info!("Formex relay listening on http://{addr}, WebSocket at /ws");

    shutdown_signal().await;
    info!("shutdown signal received");
    service.stop().await;
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

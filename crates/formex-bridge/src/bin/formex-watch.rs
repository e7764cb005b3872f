use std::time::Duration;

use clap::Parser;
use formex_bridge::{Bridge, BridgeConfig, BridgeStatus};
use formex_core::ChangeEvent;
use tracing::{error, info, warn};

/// Follow a Formex relay and react to every content change, e.g. by
/// rebuilding a static site.
#[derive(Debug, Parser)]
#[command(name = "formex-watch", version, about)]
struct Cli {
    /// Relay base URL (http(s):// or ws(s)://). Falls back to FORMEX_RELAY_URL.
    #[arg(long)]
    relay_url: Option<String>,

    /// Host this watcher stands in for. Local hosts default the relay to
    /// http://localhost:3001.
    #[arg(long, default_value = "localhost")]
    page_host: String,

    /// Failed connection attempts tolerated before giving up.
    #[arg(long, default_value_t = formex_bridge::config::DEFAULT_RECONNECT_ATTEMPTS)]
    reconnect_attempts: u32,

    /// Delay between connection attempts, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    reconnect_delay_ms: u64,

    /// Shell command run on every change. The change is exposed as
    /// FORMEX_COLLECTION, FORMEX_EVENT and FORMEX_EVENT_JSON.
    #[arg(long)]
    exec: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "formex_watch=info,formex_bridge=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = BridgeConfig {
        relay_url: cli.relay_url.or_else(|| std::env::var("FORMEX_RELAY_URL").ok()),
        page_host: Some(cli.page_host),
        reconnect_attempts: cli.reconnect_attempts,
        reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
    };

    let exec = cli.exec;
    let handle = Bridge::new(config)
        .on_refresh(move |event: &ChangeEvent| on_change(event, exec.as_deref()))
        .start()?;

    if handle.status() == BridgeStatus::Inert {
        anyhow::bail!("no relay URL configured and page host is not local");
    }

    tokio::select! {
        status = handle.wait_for(|s| s == BridgeStatus::GaveUp) => {
            error!(?status, "relay unreachable");
            anyhow::bail!("gave up connecting to the relay");
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("interrupted, stopping");
        }
    }

    handle.stop().await;
    Ok(())
}

fn on_change(event: &ChangeEvent, exec: Option<&str>) {
    info!(
        collection = %event.collection,
        event = %event.event,
        keys = event.keys.len(),
        timestamp = %event.timestamp,
        "content changed"
    );

    let Some(cmd) = exec else { return };
    let payload = match event.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize change for command");
            return;
        }
    };

    let mut command = tokio::process::Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .env("FORMEX_COLLECTION", &event.collection)
        .env("FORMEX_EVENT", &event.event)
        .env("FORMEX_EVENT_JSON", payload);

    // changes keep flowing while the command runs
    tokio::spawn(async move {
        match command.status().await {
            Ok(status) if status.success() => info!("refresh command finished"),
            Ok(status) => warn!(%status, "refresh command failed"),
            Err(e) => error!(error = %e, "refresh command could not start"),
        }
    });
}

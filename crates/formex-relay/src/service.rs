//! `RelayService`: explicit owner of the bus connections, the hub and the
//! HTTP listener, with deterministic `start()` / `stop()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use formex_bus::{BusClient, BusConnector};
use formex_core::{ChangeEvent, RelayConfig, RelayError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::{build_router, AppState};

/// How often the publisher connection is pinged to keep `/health` honest.
/// Bounds how long `redisConnected` can lag a silent bus drop.
pub const BUS_PING_INTERVAL: Duration = Duration::from_secs(1);
/// Grace period for the listener and background tasks on `stop()`.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

struct Running {
    state: Arc<AppState>,
    addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

pub struct RelayService {
    config: RelayConfig,
    connector: Arc<dyn BusConnector>,
    running: Option<Running>,
}

impl RelayService {
    pub fn new(config: RelayConfig, connector: Arc<dyn BusConnector>) -> Self {
        Self {
            config,
            connector,
            running: None,
        }
    }

    /// Connect both bus roles, then bind and serve.
    ///
    /// A bus that cannot be reached here is an error for the caller to treat
    /// as fatal; later outages only degrade delivery. Starting an already
    /// running service returns its address.
    pub async fn start(&mut self) -> Result<SocketAddr, RelayError> {
        if let Some(running) = &self.running {
            return Ok(running.addr);
        }

        let bus = Arc::new(BusClient::new(
            Arc::clone(&self.connector),
            self.config.redis_channel.clone(),
        ));
        let state = Arc::new(AppState::new(self.config.clone(), Arc::clone(&bus)));

        // bus → hub, skipping events this instance already broadcast itself
        let hub = Arc::clone(&state.hub);
        let echoes = Arc::clone(&state.echoes);
        bus.on_message(move |event: &ChangeEvent| {
            if echoes.take(event) {
                debug!(collection = %event.collection, "own event echoed by bus, skipped");
                return;
            }
            hub.broadcast(event);
        });

        let transport = self.connector.name().to_string();
        bus.connect_publisher()
            .await
            .map_err(|e| RelayError::Bus(format!("{transport} publisher: {e}")))?;
        bus.connect_subscriber()
            .await
            .map_err(|e| RelayError::Bus(format!("{transport} subscriber: {e}")))?;

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr()).await?;
        let addr = listener.local_addr()?;

        let router = build_router(Arc::clone(&state));
        let token = state.shutdown.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "http server exited with error");
            }
        });

        let pinger = tokio::spawn(ping_loop(Arc::clone(&state)));

        info!(
            %addr,
            transport = %transport,
            channel = %self.config.redis_channel,
            "relay started"
        );
        self.running = Some(Running {
            state,
            addr,
            tasks: vec![server, pinger],
        });
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Shared state of the running relay (hub, bus, config).
    pub fn state(&self) -> Option<Arc<AppState>> {
        self.running.as_ref().map(|r| Arc::clone(&r.state))
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Close client connections, stop serving and drop both bus connections.
    /// A no-op when not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.state.shutdown.cancel();
        running.state.bus.stop();

        let aborts: Vec<_> = running.tasks.iter().map(|t| t.abort_handle()).collect();
        let drain = futures_util::future::join_all(running.tasks);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}, aborting remaining tasks");
            for abort in aborts {
                abort.abort();
            }
        }
        info!(addr = %running.addr, "relay stopped");
    }
}

/// Periodically ping the publisher so `redisConnected` tracks reality even
/// when no webhooks arrive.
async fn ping_loop(state: Arc<AppState>) {
    let mut tick = tokio::time::interval(BUS_PING_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let up = state.bus.ping().await;
                debug!(up, "bus ping");
            }
            _ = state.shutdown.cancelled() => break,
        }
    }
}

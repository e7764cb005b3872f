//! Client side of the relay: one persistent WebSocket, a refresh callback per
//! change, bounded reconnects.

use std::sync::Arc;

use formex_core::ChangeEvent;
use formex_protocol::{EventFrame, UpdatePayload};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reacts to "something changed". Interpreting the event is up to the
/// handler; the bridge never filters.
pub trait RefreshHandler: Send + Sync + 'static {
    fn refresh(&self, event: &ChangeEvent);
}

impl<F> RefreshHandler for F
where
    F: Fn(&ChangeEvent) + Send + Sync + 'static,
{
    fn refresh(&self, event: &ChangeEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    /// No relay configured for this host; nothing was attempted.
    Inert,
    Connecting,
    /// The relay confirmed the connection with its marker frame.
    Connected,
    /// Reconnect attempts exhausted. Final until a new bridge is started.
    GaveUp,
    Stopped,
}

pub struct Bridge {
    config: BridgeConfig,
    handler: Option<Arc<dyn RefreshHandler>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            handler: None,
        }
    }

    pub fn on_refresh(mut self, handler: impl RefreshHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Spawn the connection task, or return an inert handle when no relay
    /// applies to this host. Must be called inside a tokio runtime.
    pub fn start(self) -> Result<BridgeHandle, BridgeError> {
        let Some(url) = self.config.resolve_url()? else {
            debug!("no relay configured for this host, bridge inert");
            let (_, status) = watch::channel(BridgeStatus::Inert);
            return Ok(BridgeHandle {
                status,
                cancel: CancellationToken::new(),
                task: None,
            });
        };

        let (status_tx, status) = watch::channel(BridgeStatus::Connecting);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            url,
            self.config,
            self.handler,
            status_tx,
            cancel.clone(),
        ));
        Ok(BridgeHandle {
            status,
            cancel,
            task: Some(task),
        })
    }
}

/// Owner of a started bridge. Dropping it stops the connection task.
pub struct BridgeHandle {
    status: watch::Receiver<BridgeStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    pub fn status(&self) -> BridgeStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `pred`. Returns the final status
    /// instead if the bridge ends without ever matching.
    pub async fn wait_for(&self, mut pred: impl FnMut(BridgeStatus) -> bool) -> BridgeStatus {
        let mut rx = self.status.clone();
        let matched = rx.wait_for(|s| pred(*s)).await.map(|s| *s);
        matched.unwrap_or_else(|_| *rx.borrow())
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "bridge task ended abnormally");
            }
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum SessionEnd {
    Lost,
    Cancelled,
}

async fn run(
    url: String,
    config: BridgeConfig,
    handler: Option<Arc<dyn RefreshHandler>>,
    status: watch::Sender<BridgeStatus>,
    cancel: CancellationToken,
) {
    let mut failures = 0u32;

    loop {
        status.send_replace(BridgeStatus::Connecting);
        let attempt = tokio::select! {
            res = connect(&url) => res,
            _ = cancel.cancelled() => break,
        };

        match attempt {
            Ok(ws) => {
                failures = 0;
                info!(url = %url, "connected to relay");
                match session(ws, handler.as_deref(), &status, &cancel).await {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Lost => warn!(url = %url, "relay connection lost"),
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    url = %url,
                    attempt = failures,
                    max = config.reconnect_attempts,
                    code = e.code(),
                    error = %e,
                    "relay connection failed"
                );
                if failures > config.reconnect_attempts {
                    error!(url = %url, "giving up on relay after {failures} failed attempts");
                    status.send_replace(BridgeStatus::GaveUp);
                    return;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = cancel.cancelled() => break,
        }
    }

    status.send_replace(BridgeStatus::Stopped);
    debug!(url = %url, "bridge stopped");
}

async fn connect(url: &str) -> Result<WsStream, BridgeError> {
    // wss:// needs a process-wide rustls provider; already installed is fine
    let _ = rustls::crypto::ring::default_provider().install_default();
    let (ws, _) = connect_async(url).await?;
    Ok(ws)
}

async fn session(
    ws: WsStream,
    handler: Option<&dyn RefreshHandler>,
    status: &watch::Sender<BridgeStatus>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut tx, mut rx) = ws.split();

    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_frame(text.as_str(), handler, status),
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Err(e)) => {
                    debug!(error = %e, "read failed");
                    return SessionEnd::Lost;
                }
                Some(Ok(_)) => {}
            },
            _ = cancel.cancelled() => {
                let _ = tx.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
        }
    }
}

fn handle_frame(
    text: &str,
    handler: Option<&dyn RefreshHandler>,
    status: &watch::Sender<BridgeStatus>,
) {
    let frame: EventFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "ignoring unrecognized frame");
            return;
        }
    };
    if !frame.is_content_update() {
        return;
    }

    match &frame.payload {
        UpdatePayload::Connected(_) => {
            status.send_replace(BridgeStatus::Connected);
        }
        UpdatePayload::Change(event) => {
            debug!(collection = %event.collection, event = %event.event, "content changed");
            if let Some(handler) = handler {
                handler.refresh(event);
            }
        }
    }
}

use axum::{
    body::Bytes,
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::app::AppState;

/// Clients only listen; anything they send is small control traffic.
const MAX_CLIENT_FRAME_BYTES: usize = 4 * 1024;
/// Server ping cadence, so dead peers are noticed and deregistered.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Axum handler: upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_CLIENT_FRAME_BYTES)
        .on_upgrade(|socket| run_connection(socket, state))
}

/// Per-connection loop: drains this client's hub queue onto the socket
/// until either side goes away or the relay shuts down.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let (conn_id, mut outbound) = state.hub.connect();
    info!(conn_id = %conn_id, clients = state.hub.len(), "client connected");

    let (mut tx, mut rx) = socket.split();

    let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else { break };
                if tx.send(Message::Text(text.into())).await.is_err() {
                    debug!(conn_id = %conn_id, "send failed, dropping client");
                    break;
                }
            }

            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "read failed, dropping client");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            _ = tick.tick() => {
                if tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            _ = state.shutdown.cancelled() => {
                let _ = tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.hub.disconnect(&conn_id);
    info!(conn_id = %conn_id, clients = state.hub.len(), "client disconnected");
}

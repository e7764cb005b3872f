use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness check plus the publisher connection state.
///
/// `redisConnected` is the last known state: it flips on the first failed
/// publish, or at the next bus ping (every [`BUS_PING_INTERVAL`]) when the
/// connection drops while idle.
///
/// [`BUS_PING_INTERVAL`]: crate::service::BUS_PING_INTERVAL
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "redisConnected": state.bus.is_connected(),
        "clients": state.hub.len(),
    }))
}

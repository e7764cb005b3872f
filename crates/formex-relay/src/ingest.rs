//! Post-response half of the webhook: normalize, publish, broadcast.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use chrono::Utc;
use formex_core::{ChangeEvent, RelayError};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::AppState;

/// Run `work` detached from the request that triggered it.
///
/// The response has already gone out, so a failure can only be logged;
/// nothing is retried and nothing reaches the original caller.
pub fn spawn_detached<F>(label: &'static str, work: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), RelayError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = work.await {
            warn!(task = label, code = e.code(), error = %e, "detached task failed");
        }
    })
}

/// Parse a webhook body leniently. Anything that is not JSON is treated as
/// an empty notification so the defaults apply.
pub fn parse_notification(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        warn!(error = %e, bytes = body.len(), "webhook body is not JSON, using defaults");
        Value::Object(Map::new())
    })
}

/// Full ingest pipeline for one accepted webhook body.
pub async fn ingest(state: Arc<AppState>, body: Bytes) -> Result<(), RelayError> {
    let notification = parse_notification(&body);
    let event = ChangeEvent::from_notification(&notification, Utc::now());
    info!(
        collection = %event.collection,
        event = %event.event,
        keys = event.keys.len(),
        "change notification normalized"
    );
    relay_change(&state, event).await
}

/// Publish `event` on the bus (when a publisher exists) and broadcast it to
/// this instance's clients.
///
/// The local broadcast happens even when the publish fails, so a bus outage
/// degrades to single-instance delivery. The publish error is still returned
/// for logging.
pub async fn relay_change(state: &AppState, event: ChangeEvent) -> Result<(), RelayError> {
    let published = if state.bus.has_publisher() {
        // remember first: our own subscription may deliver before publish returns
        state.echoes.remember(&event);
        match state.bus.publish(&event).await {
            Ok(_) => Ok(()),
            Err(e) => {
                state.echoes.take(&event);
                Err(RelayError::Bus(e.to_string()))
            }
        }
    } else {
        Ok(())
    };

    let delivered = state.hub.broadcast(&event);
    debug!(delivered, collection = %event.collection, "change broadcast to local clients");
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use formex_bus::{BusClient, MemoryBus};
    use formex_core::RelayConfig;

    fn state_with(bus: &MemoryBus) -> Arc<AppState> {
        let client = Arc::new(BusClient::new(Arc::new(bus.clone()), "test:channel"));
        Arc::new(AppState::new(RelayConfig::default(), client))
    }

    #[test]
    fn non_json_body_becomes_empty_object() {
        assert_eq!(parse_notification(b""), Value::Object(Map::new()));
        assert_eq!(parse_notification(b"source=directus"), Value::Object(Map::new()));
        assert_eq!(
            parse_notification(br#"{"source":"directus"}"#)["source"],
            "directus"
        );
    }

    #[tokio::test]
    async fn relay_without_publisher_still_broadcasts() {
        let state = state_with(&MemoryBus::new());
        let (_, mut rx) = state.hub.connect();
        let _marker = rx.recv().await;

        let event = ChangeEvent::from_notification(&serde_json::json!({}), Utc::now());
        relay_change(&state, event).await.unwrap();

        assert!(rx.recv().await.unwrap().contains(r#""collection":"unknown""#));
        assert!(state.echoes.is_empty());
    }

    #[tokio::test]
    async fn failed_publish_still_broadcasts_and_reports() {
        let bus = MemoryBus::new();
        let state = state_with(&bus);
        state.bus.connect_publisher().await.unwrap();
        let (_, mut rx) = state.hub.connect();
        let _marker = rx.recv().await;

        bus.set_connected(false);
        let event = ChangeEvent::from_notification(&serde_json::json!({}), Utc::now());
        let result = relay_change(&state, event).await;

        assert!(matches!(result, Err(RelayError::Bus(_))));
        assert!(rx.recv().await.is_some());
        assert!(state.echoes.is_empty(), "no echo expected after failed publish");
    }

    #[tokio::test]
    async fn detached_failure_is_swallowed() {
        let handle = spawn_detached("test", async {
            Err(RelayError::Bus("down".to_string()))
        });
        assert!(handle.await.is_ok());
    }
}

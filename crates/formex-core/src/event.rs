use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collection name used when a notification does not say what changed.
pub const UNKNOWN_COLLECTION: &str = "unknown";
/// Event kind used when a notification carries no action.
pub const DEFAULT_EVENT: &str = "update";

/// Identifier of an affected record: backends send both numeric and string keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventKey {
    Number(serde_json::Number),
    Text(String),
}

impl EventKey {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for EventKey {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for EventKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Canonical record of one content change, transported unchanged from the
/// ingest endpoint through the bus to every connected client.
///
/// Wire: `{ "collection": "posts", "event": "update", "timestamp": "...Z", "keys": [5, 6] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub event: String,
    /// ISO-8601 time the relay processed the notification.
    pub timestamp: String,
    #[serde(default)]
    pub keys: Vec<EventKey>,
}

impl ChangeEvent {
    /// Normalize a loosely-typed backend notification, stamping it with `at`.
    ///
    /// Each field is resolved independently:
    ///   - collection: `collection` → `payload.collection` → "unknown"
    ///   - event:      `event` → `type` → `payload.action` → "update"
    ///   - keys:       `keys` → `payload.keys` → []
    pub fn from_notification(body: &Value, at: DateTime<Utc>) -> Self {
        let nested = body.get("payload");
        let nested_field = |name: &str| nested.and_then(|p| p.get(name));

        let collection = [body.get("collection"), nested_field("collection")]
            .into_iter()
            .find_map(text_candidate)
            .unwrap_or_else(|| UNKNOWN_COLLECTION.to_string());

        let event = [body.get("event"), body.get("type"), nested_field("action")]
            .into_iter()
            .find_map(text_candidate)
            .unwrap_or_else(|| DEFAULT_EVENT.to_string());

        // keys only fall through on absent/null, an explicit [] wins
        let keys = [body.get("keys"), nested_field("keys")]
            .into_iter()
            .flatten()
            .find(|v| !v.is_null())
            .map(keys_from_value)
            .unwrap_or_default();

        Self {
            collection,
            event,
            timestamp: iso_timestamp(at),
            keys,
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// `2026-10-18T07:33:00.123Z`: millisecond precision, UTC designator.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A usable string field: non-empty text, or a number rendered as text.
fn text_candidate(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn keys_from_value(value: &Value) -> Vec<EventKey> {
    match value {
        Value::Array(items) => items.iter().filter_map(EventKey::from_value).collect(),
        other => EventKey::from_value(other).into_iter().collect(),
    }
}

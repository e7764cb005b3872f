use formex_core::ChangeEvent;
use serde::{Deserialize, Serialize};

/// The single event name served on the client channel.
pub const CONTENT_UPDATE: &str = "content:update";

/// Synthetic "we're live" marker, sent once per connection before any change.
/// Wire: `{ "type": "connected" }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectedMarker {
    Connected,
}

/// Payload carried by a `content:update` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdatePayload {
    /// Must stay first: a ChangeEvent never carries `type`, so the marker
    /// is only matched by the marker itself.
    Connected(ConnectedMarker),
    Change(ChangeEvent),
}

impl UpdatePayload {
    pub fn is_connected_marker(&self) -> bool {
        matches!(self, UpdatePayload::Connected(_))
    }

    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            UpdatePayload::Change(ev) => Some(ev),
            UpdatePayload::Connected(_) => None,
        }
    }
}

/// Server → client push frame.
/// Wire: `{ "event": "content:update", "payload": {...} }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    pub payload: UpdatePayload,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: UpdatePayload) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    pub fn connected() -> Self {
        Self::new(
            CONTENT_UPDATE,
            UpdatePayload::Connected(ConnectedMarker::Connected),
        )
    }

    pub fn update(event: ChangeEvent) -> Self {
        Self::new(CONTENT_UPDATE, UpdatePayload::Change(event))
    }

    pub fn is_content_update(&self) -> bool {
        self.event == CONTENT_UPDATE
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

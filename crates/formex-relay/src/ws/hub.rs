use chrono::{DateTime, Utc};
use dashmap::DashMap;
use formex_core::ChangeEvent;
use formex_protocol::EventFrame;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One live client connection. Owned by the [`Hub`]; gone on disconnect.
pub struct ConnectedClient {
    tx: mpsc::UnboundedSender<String>,
    pub connected_at: DateTime<Utc>,
}

/// Fan-out of every change to every connected client.
///
/// Each client gets its own FIFO queue, drained by its connection task, so
/// per-client order follows `broadcast` call order while a slow client never
/// holds up the others.
pub struct Hub {
    clients: DashMap<String, ConnectedClient>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Register a client. The connected marker is queued before the client
    /// becomes visible to `broadcast`, so it is always the first frame.
    pub fn connect(&self) -> (String, mpsc::UnboundedReceiver<String>) {
        let conn_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        match EventFrame::connected().to_text() {
            Ok(marker) => {
                let _ = tx.send(marker);
            }
            Err(e) => warn!(conn_id = %conn_id, error = %e, "failed to encode connected marker"),
        }

        self.clients.insert(
            conn_id.clone(),
            ConnectedClient {
                tx,
                connected_at: Utc::now(),
            },
        );
        (conn_id, rx)
    }

    /// Deregister a client. Returns whether it was still registered.
    pub fn disconnect(&self, conn_id: &str) -> bool {
        match self.clients.remove(conn_id) {
            Some((_, client)) => {
                let lived_ms = (Utc::now() - client.connected_at).num_milliseconds();
                debug!(conn_id, lived_ms, "client deregistered");
                true
            }
            None => false,
        }
    }

    /// Queue `event` for every registered client; returns how many got it.
    ///
    /// Fire and forget: a client whose queue is closed is pruned and skipped.
    pub fn broadcast(&self, event: &ChangeEvent) -> usize {
        let text = match EventFrame::update(event.clone()).to_text() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to encode change event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().tx.send(text.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(entry.key().clone());
            }
        }
        for conn_id in closed {
            self.clients.remove(&conn_id);
            debug!(conn_id = %conn_id, "pruned closed client");
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

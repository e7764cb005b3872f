use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::BusError;

/// Raw payloads buffered between a subscriber connection and its dispatch loop.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Publishing half of a bus: a connection used for nothing but PUBLISH.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hand one payload to the bus. At-most-once: nothing is buffered or
    /// retried when the connection is down.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Last known connection state, without touching the network.
    fn is_connected(&self) -> bool;

    /// Actively check the connection and refresh [`Publisher::is_connected`].
    async fn ping(&self) -> bool {
        self.is_connected()
    }
}

/// Factory for the two independent connections a relay needs.
///
/// The subscriber never shares a socket with the publisher: once a
/// connection has subscribed it may not issue other commands.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Stable lowercase transport name (e.g. `"redis"`), used in logs.
    fn name(&self) -> &str;

    async fn connect_publisher(&self) -> Result<Arc<dyn Publisher>, BusError>;

    /// Subscribe a fresh connection to exactly one channel.
    async fn connect_subscriber(&self, channel: &str) -> Result<Subscription, BusError>;
}

/// Receipt-ordered stream of raw payloads from one subscribed channel.
///
/// Dropping the subscription stops the task that feeds it.
pub struct Subscription {
    messages: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(messages: mpsc::Receiver<String>, task: JoinHandle<()>) -> Self {
        Self { messages, task }
    }

    /// Next payload, or `None` once the feeding connection has ended for good.
    pub async fn recv(&mut self) -> Option<String> {
        self.messages.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

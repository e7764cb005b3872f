use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::BusError;
use crate::transport::{BusConnector, Publisher, Subscription, SUBSCRIPTION_BUFFER};

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Envelope {
    channel: String,
    payload: String,
}

struct Inner {
    tx: broadcast::Sender<Envelope>,
    up: AtomicBool,
}

/// In-process pub/sub bus for single-node deployments and tests.
///
/// Clones share one bus, so several relays built from clones of the same
/// `MemoryBus` behave like instances sharing one Redis. `set_connected(false)`
/// simulates an outage: publishes fail and new connections are refused.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tx,
                up: AtomicBool::new(true),
            }),
        }
    }

    pub fn set_connected(&self, up: bool) {
        self.inner.up.store(up, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.inner.up.load(Ordering::SeqCst)
    }

    fn publish_raw(&self, channel: &str, payload: &str) -> Result<usize, BusError> {
        if !self.is_up() {
            return Err(BusError::NotConnected);
        }
        let envelope = Envelope {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        // zero subscribers is a successful publish, like Redis returning 0
        Ok(self.inner.tx.send(envelope).unwrap_or(0))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryPublisher {
    bus: MemoryBus,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let receivers = self.bus.publish_raw(channel, payload)?;
        debug!(channel, receivers, "published to memory bus");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.bus.is_up()
    }
}

#[async_trait]
impl BusConnector for MemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect_publisher(&self) -> Result<Arc<dyn Publisher>, BusError> {
        if !self.is_up() {
            return Err(BusError::ConnectionFailed("memory bus is down".to_string()));
        }
        Ok(Arc::new(MemoryPublisher { bus: self.clone() }))
    }

    async fn connect_subscriber(&self, channel: &str) -> Result<Subscription, BusError> {
        if !self.is_up() {
            return Err(BusError::ConnectionFailed("memory bus is down".to_string()));
        }
        // subscribe before returning so nothing published afterwards is missed
        let mut bus_rx = self.inner.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = channel.to_string();

        let task = tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(envelope) if envelope.channel == channel => {
                        if tx.send(envelope.payload).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use formex_core::ChangeEvent;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, MessageHandler};
use crate::error::BusError;
use crate::transport::{BusConnector, Publisher};

/// Dual-connection handle to the shared bus for one channel.
///
/// The publisher and the subscriber are separate connections created by the
/// same [`BusConnector`]. Subscribed messages are decoded once and handed to
/// every handler registered with [`BusClient::on_message`].
pub struct BusClient {
    connector: Arc<dyn BusConnector>,
    channel: String,
    publisher: RwLock<Option<Arc<dyn Publisher>>>,
    dispatcher: Arc<Dispatcher>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl BusClient {
    pub fn new(connector: Arc<dyn BusConnector>, channel: impl Into<String>) -> Self {
        Self {
            connector,
            channel: channel.into(),
            publisher: RwLock::new(None),
            dispatcher: Arc::new(Dispatcher::new()),
            dispatch_task: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Open the publish-only connection. Callers decide whether a failure is
    /// fatal (startup) or not (runtime).
    pub async fn connect_publisher(&self) -> Result<(), BusError> {
        let publisher = self.connector.connect_publisher().await?;
        *self.publisher.write().unwrap_or_else(PoisonError::into_inner) = Some(publisher);
        info!(transport = self.connector.name(), "bus publisher ready");
        Ok(())
    }

    /// Register a handler for every ChangeEvent received on the channel.
    pub fn on_message(&self, handler: impl MessageHandler + 'static) {
        self.dispatcher.register(Arc::new(handler));
    }

    /// Open the subscriber connection and start the dispatch loop.
    ///
    /// Handlers registered before or after this call all receive messages;
    /// a repeated call replaces the previous subscription.
    pub async fn connect_subscriber(&self) -> Result<(), BusError> {
        let mut subscription = self.connector.connect_subscriber(&self.channel).await?;
        let dispatcher = Arc::clone(&self.dispatcher);
        let channel = self.channel.clone();

        let task = tokio::spawn(async move {
            while let Some(raw) = subscription.recv().await {
                dispatcher.dispatch_raw(&raw);
            }
            debug!(channel = %channel, "bus subscription ended");
        });

        let previous = self
            .dispatch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(
            transport = self.connector.name(),
            channel = %self.channel,
            "bus subscriber ready"
        );
        Ok(())
    }

    fn publisher(&self) -> Option<Arc<dyn Publisher>> {
        self.publisher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_publisher(&self) -> bool {
        self.publisher().is_some()
    }

    /// Last known publisher state; `false` when no publisher was ever opened.
    pub fn is_connected(&self) -> bool {
        self.publisher().is_some_and(|p| p.is_connected())
    }

    /// Ping the publisher connection and refresh [`BusClient::is_connected`].
    pub async fn ping(&self) -> bool {
        match self.publisher() {
            Some(publisher) => publisher.ping().await,
            None => false,
        }
    }

    /// Serialize and publish one event.
    ///
    /// Returns `Ok(false)` when there is no publisher connection to use.
    pub async fn publish(&self, event: &ChangeEvent) -> Result<bool, BusError> {
        let Some(publisher) = self.publisher() else {
            return Ok(false);
        };
        let payload = serde_json::to_string(event)?;
        publisher.publish(&self.channel, &payload).await?;
        Ok(true)
    }

    /// Drop both connections and stop the dispatch loop.
    pub fn stop(&self) {
        if let Some(task) = self
            .dispatch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.publisher
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(channel = %self.channel, "bus client stopped");
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.stop();
    }
}

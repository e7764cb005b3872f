use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::transport::{BusConnector, Publisher, Subscription, SUBSCRIPTION_BUFFER};

/// First delay before re-subscribing after the subscriber connection drops.
const RESUBSCRIBE_BASE: Duration = Duration::from_secs(1);
/// Cap for the doubling re-subscribe delay.
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Redis pub/sub transport.
///
/// The publisher rides a [`ConnectionManager`], which reconnects on its own;
/// the subscriber keeps a dedicated connection and re-subscribes with
/// backoff whenever it is lost.
pub struct RedisConnector {
    client: redis::Client,
}

impl RedisConnector {
    /// Parse the URL. No network I/O happens until a connection is requested.
    pub fn open(url: &str) -> Result<Self, BusError> {
        let client =
            redis::Client::open(url).map_err(|e| BusError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BusConnector for RedisConnector {
    fn name(&self) -> &str {
        "redis"
    }

    async fn connect_publisher(&self) -> Result<Arc<dyn Publisher>, BusError> {
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;
        info!("redis publisher connected");
        Ok(Arc::new(RedisPublisher {
            conn,
            connected: AtomicBool::new(true),
        }))
    }

    async fn connect_subscriber(&self, channel: &str) -> Result<Subscription, BusError> {
        let pubsub = subscribe(&self.client, channel).await?;
        info!(channel, "redis subscriber connected");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(pump(
            self.client.clone(),
            channel.to_string(),
            pubsub,
            tx,
        ));
        Ok(Subscription::new(rx, task))
    }
}

struct RedisPublisher {
    conn: ConnectionManager,
    connected: AtomicBool,
}

impl RedisPublisher {
    /// Record the connection state, logging only on transitions.
    fn mark(&self, up: bool) {
        let was = self.connected.swap(up, Ordering::SeqCst);
        match (was, up) {
            (false, true) => info!("redis publisher connection re-established"),
            (true, false) => warn!("redis publisher connection lost"),
            _ => {}
        }
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = conn.publish(channel, payload).await;
        match result {
            Ok(receivers) => {
                self.mark(true);
                debug!(channel, receivers, "published to redis");
                Ok(())
            }
            Err(e) => {
                self.mark(false);
                Err(BusError::PublishFailed(e.to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        let up = pong.is_ok();
        self.mark(up);
        up
    }
}

async fn subscribe(client: &redis::Client, channel: &str) -> Result<PubSub, BusError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;
    Ok(pubsub)
}

/// Forward payloads until the subscription is dropped, re-subscribing
/// whenever the connection ends underneath us.
async fn pump(
    client: redis::Client,
    channel: String,
    mut pubsub: PubSub,
    tx: mpsc::Sender<String>,
) {
    loop {
        let mut messages = Box::pin(pubsub.into_on_message());
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "non-text redis payload dropped");
                    continue;
                }
            };
            if tx.send(payload).await.is_err() {
                return;
            }
        }

        warn!(channel = %channel, "redis subscriber connection lost, re-subscribing");
        pubsub = match resubscribe(&client, &channel, &tx).await {
            Some(p) => p,
            None => return,
        };
    }
}

/// Exponential backoff (1 s → 30 s) until SUBSCRIBE succeeds again.
/// Gives up only when the receiving side is gone.
async fn resubscribe(
    client: &redis::Client,
    channel: &str,
    tx: &mpsc::Sender<String>,
) -> Option<PubSub> {
    let mut delay = RESUBSCRIBE_BASE;
    loop {
        if tx.is_closed() {
            return None;
        }
        sleep(delay).await;
        match subscribe(client, channel).await {
            Ok(pubsub) => {
                info!(channel, "redis subscriber re-established");
                return Some(pubsub);
            }
            Err(e) => {
                warn!(
                    channel,
                    error = %e,
                    retry_after_ms = delay.as_millis() as u64,
                    "redis re-subscribe failed, retrying with backoff"
                );
                delay = (delay * 2).min(RESUBSCRIBE_MAX);
            }
        }
    }
}

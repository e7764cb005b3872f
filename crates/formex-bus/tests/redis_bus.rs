//! Round trip through a live Redis. Run with:
//! `REDIS_URL=redis://localhost:6379 cargo test -p formex-bus -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use formex_bus::{BusClient, RedisConnector};
use formex_core::ChangeEvent;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

#[tokio::test]
#[ignore = "requires a running redis server"]
async fn redis_round_trip_is_identity() {
    let channel = format!("formex:test:{}", std::process::id());
    let connector = Arc::new(RedisConnector::open(&redis_url()).unwrap());

    let client = BusClient::new(connector, channel);
    client.connect_publisher().await.unwrap();
    assert!(client.ping().await);

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_message(move |ev: &ChangeEvent| {
        let _ = tx.send(ev.clone());
    });
    client.connect_subscriber().await.unwrap();

    let sent = ChangeEvent::from_notification(
        &serde_json::json!({"collection": "posts", "event": "create", "keys": [1, "a"]}),
        chrono::Utc::now(),
    );
    assert!(client.publish(&sent).await.unwrap());

    let got = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("closed");
    assert_eq!(got, sent);
    client.stop();
}

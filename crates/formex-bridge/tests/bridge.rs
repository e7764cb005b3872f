//! Bridge against a real relay (in-memory bus) on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use formex_bridge::{Bridge, BridgeConfig, BridgeStatus};
use formex_bus::MemoryBus;
use formex_core::{ChangeEvent, RelayConfig};
use formex_relay::RelayService;
use tokio::sync::mpsc;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

fn relay_config(port: u16) -> RelayConfig {
    RelayConfig {
        bind: "127.0.0.1".into(),
        port,
        ..RelayConfig::default()
    }
}

async fn boot_relay(bus: &MemoryBus, port: u16) -> (RelayService, SocketAddr) {
    let mut service = RelayService::new(relay_config(port), Arc::new(bus.clone()));
    let addr = service.start().await.expect("relay starts");
    (service, addr)
}

fn fast_config(url: String, attempts: u32) -> BridgeConfig {
    BridgeConfig {
        reconnect_attempts: attempts,
        reconnect_delay: Duration::from_millis(50),
        ..BridgeConfig::with_relay_url(url)
    }
}

/// Bridge whose refreshes land in a channel.
fn watched(config: BridgeConfig) -> (Bridge, mpsc::UnboundedReceiver<ChangeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let bridge = Bridge::new(config).on_refresh(move |ev: &ChangeEvent| {
        let _ = tx.send(ev.clone());
    });
    (bridge, rx)
}

async fn post_webhook(addr: SocketAddr, body: &'static str) {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/webhook"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
}

#[tokio::test]
async fn refresh_fires_for_changes_not_for_marker() {
    let bus = MemoryBus::new();
    let (mut relay, addr) = boot_relay(&bus, 0).await;

    let (bridge, mut refreshes) = watched(fast_config(format!("http://{addr}"), 3));
    let handle = bridge.start().unwrap();
    let status = timeout(TIMEOUT, handle.wait_for(|s| s == BridgeStatus::Connected))
        .await
        .unwrap();
    assert_eq!(status, BridgeStatus::Connected);
    assert!(refreshes.try_recv().is_err(), "marker must not trigger a refresh");

    post_webhook(addr, r#"{"collection":"posts","event":"create","keys":[42]}"#).await;
    let change = timeout(TIMEOUT, refreshes.recv()).await.unwrap().unwrap();
    assert_eq!(change.collection, "posts");
    assert_eq!(change.event, "create");

    handle.stop().await;
    relay.stop().await;
}

#[tokio::test]
async fn ws_url_is_accepted_as_is() {
    let bus = MemoryBus::new();
    let (mut relay, addr) = boot_relay(&bus, 0).await;

    let handle = Bridge::new(fast_config(format!("ws://{addr}/ws"), 3))
        .start()
        .unwrap();
    let status = timeout(TIMEOUT, handle.wait_for(|s| s == BridgeStatus::Connected))
        .await
        .unwrap();
    assert_eq!(status, BridgeStatus::Connected);

    handle.stop().await;
    relay.stop().await;
}

#[tokio::test]
async fn gives_up_after_bounded_attempts() {
    // grab a free port, then leave it closed
    let port = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };

    let handle = Bridge::new(fast_config(format!("http://127.0.0.1:{port}"), 2))
        .start()
        .unwrap();
    let status = timeout(TIMEOUT, handle.wait_for(|s| s == BridgeStatus::GaveUp))
        .await
        .unwrap();
    assert_eq!(status, BridgeStatus::GaveUp);

    // final: nothing else happens afterwards
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.status(), BridgeStatus::GaveUp);
}

#[tokio::test]
async fn reconnects_after_relay_restart() {
    let bus = MemoryBus::new();
    let (mut relay, addr) = boot_relay(&bus, 0).await;

    let (bridge, mut refreshes) = watched(fast_config(format!("http://{addr}"), 40));
    let handle = bridge.start().unwrap();
    timeout(TIMEOUT, handle.wait_for(|s| s == BridgeStatus::Connected))
        .await
        .unwrap();

    relay.stop().await;
    let status = timeout(TIMEOUT, handle.wait_for(|s| s == BridgeStatus::Connecting))
        .await
        .unwrap();
    assert_eq!(status, BridgeStatus::Connecting);

    let (mut relay, addr) = boot_relay(&bus, addr.port()).await;
    let status = timeout(TIMEOUT, handle.wait_for(|s| s == BridgeStatus::Connected))
        .await
        .unwrap();
    assert_eq!(status, BridgeStatus::Connected);

    post_webhook(addr, r#"{"collection":"after-restart"}"#).await;
    let change = timeout(TIMEOUT, refreshes.recv()).await.unwrap().unwrap();
    assert_eq!(change.collection, "after-restart");

    handle.stop().await;
    relay.stop().await;
}

#[tokio::test]
async fn stop_disconnects_from_relay() {
    let bus = MemoryBus::new();
    let (mut relay, addr) = boot_relay(&bus, 0).await;
    let state = relay.state().unwrap();

    let handle = Bridge::new(fast_config(format!("http://{addr}"), 3))
        .start()
        .unwrap();
    timeout(TIMEOUT, handle.wait_for(|s| s == BridgeStatus::Connected))
        .await
        .unwrap();
    assert_eq!(state.hub.len(), 1);

    let mut status = handle.subscribe();
    handle.stop().await;
    assert_eq!(*status.borrow_and_update(), BridgeStatus::Stopped);

    timeout(TIMEOUT, async {
        while !state.hub.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay deregisters the bridge");
    relay.stop().await;
}

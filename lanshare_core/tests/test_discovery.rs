mod common;

use common::{LOCALHOST, wait_until};
use lanshare_core::discovery::{self, Announcement, BROADCAST_MAGIC, Broadcaster, DiscoveryListener};
use lanshare_core::registry::PeerRegistry;
use lanshare_core::{AppEvent, Reporter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn listener(
    my_nickname: &str,
) -> (DiscoveryListener, Arc<PeerRegistry>, mpsc::UnboundedReceiver<AppEvent>) {
    let registry = Arc::new(PeerRegistry::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = DiscoveryListener::bind(
        SocketAddr::new(LOCALHOST, 0),
        registry.clone(),
        Reporter::new(tx),
        my_nickname.to_string(),
    )
    .await
    .expect("Failed to bind discovery listener");
    (listener, registry, rx)
}

fn from() -> SocketAddr {
    "192.168.1.77:65431".parse().unwrap()
}

#[tokio::test]
async fn test_broadcaster_reaches_listener() {
    let (listener, registry, mut events) = listener("desk").await;
    let target = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(listener.run(cancel.clone()));

    // 1. Announce over loopback instead of the broadcast address
    let broadcaster = Broadcaster::bind(
        SocketAddr::new(LOCALHOST, 0),
        target,
        &Announcement::new("laptop", "10.0.0.9"),
    )
    .await
    .unwrap();
    tokio::spawn(broadcaster.run(Duration::from_millis(50), cancel.clone()));

    // 2. The listener records the declared address
    assert!(wait_until(|| registry.get("laptop").is_some()).await);
    let peer = registry.get("laptop").unwrap();
    assert_eq!(peer.address, "10.0.0.9");
    assert_eq!(peer.device_class, "desktop");
    assert!(!peer.pinned);

    // 3. Repeated announcements only report the peer once
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut discovered = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, AppEvent::PeerDiscovered { .. }) {
            discovered += 1;
        }
    }
    assert_eq!(discovered, 1);
    cancel.cancel();
}

#[tokio::test]
async fn test_own_announcement_is_ignored() {
    let (listener, registry, _events) = listener("desk").await;
    let own = Announcement::new("desk", "10.0.0.2").to_bytes().unwrap();

    assert_eq!(listener.handle_datagram(&own, from()), None);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_foreign_datagrams_are_dropped() {
    let (listener, registry, _events) = listener("desk").await;

    let wrong_magic = br#"{"magic":"something-else","nickname":"x","ip":"10.0.0.3"}"#;
    let no_magic = br#"{"nickname":"x","ip":"10.0.0.3"}"#;
    let datagrams: [&[u8]; 4] = [wrong_magic, no_magic, b"\x00\x01garbage", b""];
    for datagram in datagrams {
        assert_eq!(listener.handle_datagram(datagram, from()), None);
    }
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_missing_ip_falls_back_to_sender() {
    let (listener, registry, _events) = listener("desk").await;
    let datagram = format!(r#"{{"magic":"{}","nickname":"tablet"}}"#, BROADCAST_MAGIC);

    assert_eq!(
        listener.handle_datagram(datagram.as_bytes(), from()),
        Some("tablet".to_string())
    );
    let peer = registry.get("tablet").unwrap();
    assert_eq!(peer.address, "192.168.1.77");
    assert_eq!(peer.device_class, "unknown");
}

#[tokio::test]
async fn test_sweeper_evicts_only_unpinned_peers() {
    let registry = Arc::new(PeerRegistry::new());
    let (tx, mut events) = mpsc::unbounded_channel();
    registry.upsert("quiet", "10.0.0.5", "desktop", false);
    registry.upsert("paired", "10.0.0.6", "android", true);

    let cancel = CancellationToken::new();
    tokio::spawn(discovery::run_sweeper(
        registry.clone(),
        Reporter::new(tx),
        Duration::from_millis(20),
        Duration::from_millis(50),
        cancel.clone(),
    ));

    assert!(wait_until(|| registry.get("quiet").is_none()).await);
    assert!(registry.get("paired").is_some());

    let mut lost = Vec::new();
    let mut logs = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            AppEvent::PeerLost { nickname } => lost.push(nickname),
            AppEvent::Log(line) => logs.push(line),
            _ => {}
        }
    }
    assert_eq!(lost, vec!["quiet".to_string()]);
    assert!(logs.iter().any(|l| l == "Peer quiet timed out"));
    cancel.cancel();
}

#[tokio::test]
async fn test_sweeper_survives_zero_interval() {
    let registry = Arc::new(PeerRegistry::new());
    let (tx, _events) = mpsc::unbounded_channel();
    registry.upsert("quiet", "10.0.0.5", "desktop", false);

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(discovery::run_sweeper(
        registry.clone(),
        Reporter::new(tx),
        Duration::ZERO,
        Duration::from_millis(50),
        cancel.clone(),
    ));

    assert!(wait_until(|| registry.get("quiet").is_none()).await);
    cancel.cancel();
    // A panicking ticker would surface as a join error
    sweeper.await.expect("Sweeper should stop cleanly");
}

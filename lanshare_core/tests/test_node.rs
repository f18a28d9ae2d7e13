mod common;

use common::{auto_decide, test_config, wait_until};
use lanshare_core::ShareNode;
use lanshare_core::node::FOLDER_TAG;
use tokio::sync::mpsc;

async fn start_node(root: &std::path::Path, nickname: &str) -> ShareNode {
    let (event_tx, _events) = mpsc::unbounded_channel();
    ShareNode::start(test_config(root, nickname), event_tx, auto_decide(false))
        .await
        .expect("Node should start")
}

#[tokio::test]
async fn test_node_binds_every_listener() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(dir.path(), "desk").await;

    let bound = node.bound_addrs();
    assert!(bound.discovery.is_some());
    assert!(bound.transfer.is_some());
    assert!(bound.pairing.is_some());
    assert!(node.config().shared_dir.is_dir());
    assert!(node.config().download_dir.is_dir());

    // Loopback cannot be scanned from another device
    assert!(node.connection_string().is_err());
    node.shutdown().await;
}

#[tokio::test]
async fn test_share_folder_management() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(&dir.path().join("node"), "desk").await;

    let outside = dir.path().join("outside");
    std::fs::create_dir_all(outside.join("album/inner")).unwrap();
    std::fs::write(outside.join("album/inner/pic.png"), b"png").unwrap();
    std::fs::write(outside.join("Notes.txt"), b"notes").unwrap();

    assert_eq!(node.add_to_share(&outside.join("album")).await.unwrap(), "album");
    assert_eq!(node.add_to_share(&outside.join("Notes.txt")).await.unwrap(), "Notes.txt");
    // Never overwrite an existing item
    assert!(node.add_to_share(&outside.join("Notes.txt")).await.is_err());

    let items = node.shareable_items().await.unwrap();
    assert_eq!(items, vec![format!("album{}", FOLDER_TAG), "Notes.txt".to_string()]);
    assert!(node.config().shared_dir.join("album/inner/pic.png").is_file());

    node.remove_from_share(&format!("album{}", FOLDER_TAG)).await.unwrap();
    node.remove_from_share("Notes.txt").await.unwrap();
    assert!(node.shareable_items().await.unwrap().is_empty());
    assert!(node.remove_from_share("Notes.txt").await.is_err());
    node.shutdown().await;
}

#[tokio::test]
async fn test_nodes_pair_through_connection_string() {
    let dir = tempfile::tempdir().unwrap();
    let desk = start_node(&dir.path().join("desk"), "desk").await;
    let phone = start_node(&dir.path().join("phone"), "phone").await;

    let pairing_port = desk.bound_addrs().pairing.unwrap().port();
    let nickname = phone
        .pair_with(&format!("127.0.0.1:{}", pairing_port))
        .await
        .expect("Pairing should succeed");
    assert_eq!(nickname, "desk");
    assert!(phone.registry().get("desk").unwrap().pinned);
    assert!(wait_until(|| desk.registry().get("phone").is_some()).await);

    desk.shutdown().await;
    phone.shutdown().await;
}

#[tokio::test]
async fn test_send_to_unknown_peer_through_node() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(dir.path(), "desk").await;
    std::fs::write(node.config().shared_dir.join("a.txt"), b"a").unwrap();

    let result = node.send_item("nobody", "a.txt").await;
    assert!(matches!(result, Err(lanshare_core::ShareError::PeerNotFound(_))));
    assert!(node.transfers().is_empty());
    node.shutdown().await;
}

#![allow(dead_code)]

use lanshare_core::config::ShareConfig;
use lanshare_core::registry::PeerRegistry;
use lanshare_core::transfer::{TransferContext, TransferServer};
use lanshare_core::{ActiveTransfers, AppEvent, Reporter, TransferRequest};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Route `tracing` output to the test harness; set `RUST_LOG` to see it
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config rooted in `root`, bound to loopback on ephemeral ports
pub fn test_config(root: &Path, nickname: &str) -> ShareConfig {
    ShareConfig {
        nickname: nickname.to_string(),
        shared_dir: root.join("sharable"),
        download_dir: root.join("downloads"),
        advertise_ip: Some(LOCALHOST),
        bind_ip: LOCALHOST,
        broadcast_ip: LOCALHOST,
        discovery_port: 0,
        transfer_port: 0,
        pairing_port: 0,
        pairing_timeout_secs: 2,
        io_timeout_secs: 5,
        decision_timeout_secs: 5,
        ..ShareConfig::default()
    }
}

/// Decision channel that answers every request with `accept`
pub fn auto_decide(accept: bool) -> mpsc::Sender<TransferRequest> {
    let (tx, mut rx) = mpsc::channel::<TransferRequest>(16);
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            request.respond(accept);
        }
    });
    tx
}

pub struct Node {
    pub ctx: Arc<TransferContext>,
    pub events: mpsc::UnboundedReceiver<AppEvent>,
}

pub fn transfer_node(
    config: &ShareConfig,
    decision_tx: mpsc::Sender<TransferRequest>,
) -> Node {
    init_tracing();
    config.ensure_dirs().expect("Failed to create test dirs");
    let (event_tx, events) = mpsc::unbounded_channel();
    let ctx = Arc::new(TransferContext::new(
        config,
        Arc::new(PeerRegistry::new()),
        ActiveTransfers::new(),
        Reporter::new(event_tx),
        decision_tx,
    ));
    Node { ctx, events }
}

/// Bind a transfer server on loopback and run it until the token fires
pub async fn spawn_server(ctx: Arc<TransferContext>) -> (SocketAddr, CancellationToken) {
    let server = TransferServer::bind(SocketAddr::new(LOCALHOST, 0), ctx)
        .await
        .expect("Failed to bind transfer server");
    let addr = server.local_addr().expect("Failed to get local addr");
    let cancel = CancellationToken::new();
    tokio::spawn(server.run(cancel.clone()));
    (addr, cancel)
}

/// Poll `cond` until it holds or two seconds pass
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Drain every event received so far
pub fn drain_logs(events: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<String> {
    let mut logs = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let AppEvent::Log(line) = event {
            logs.push(line);
        }
    }
    logs
}

//! A running LAN share node: discovery, transfer and pairing services
//! bound together under one shutdown token.

use anyhow::{Context, bail};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ShareConfig;
use crate::discovery::{self, Announcement, Broadcaster, DiscoveryListener};
use crate::error::Result;
use crate::pairing::{self, PairingContext, PairingServer};
use crate::registry::PeerRegistry;
use crate::transfer::{self, SendOutcome, TransferContext, TransferServer};
use crate::transfers::ActiveTransfers;
use crate::{AppEvent, Reporter, TransferRequest};

/// Suffix appended to directory names in [`ShareNode::shareable_items`]
pub const FOLDER_TAG: &str = " [Folder]";

/// Addresses the node's listeners actually bound to.
///
/// `None` means binding failed and that service is not running.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundAddrs {
    pub discovery: Option<SocketAddr>,
    pub transfer: Option<SocketAddr>,
    pub pairing: Option<SocketAddr>,
}

pub struct ShareNode {
    config: ShareConfig,
    local_ip: IpAddr,
    registry: Arc<PeerRegistry>,
    transfers: ActiveTransfers,
    reporter: Reporter,
    transfer_ctx: Arc<TransferContext>,
    pairing_ctx: Arc<PairingContext>,
    bound: BoundAddrs,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShareNode {
    /// Start every service. A listener that cannot bind is logged and skipped.
    pub async fn start(
        mut config: ShareConfig,
        event_tx: mpsc::UnboundedSender<AppEvent>,
        decision_tx: mpsc::Sender<TransferRequest>,
    ) -> anyhow::Result<Self> {
        config
            .ensure_dirs()
            .context("Failed to prepare share directories")?;

        // Resolve once so announcements, handshakes and the QR string agree
        let local_ip = config.local_ip();
        config.advertise_ip = Some(local_ip);

        let reporter = Reporter::new(event_tx);
        let registry = Arc::new(PeerRegistry::new());
        let transfers = ActiveTransfers::new();
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        let mut bound = BoundAddrs::default();

        let transfer_ctx = Arc::new(TransferContext::new(
            &config,
            registry.clone(),
            transfers.clone(),
            reporter.clone(),
            decision_tx,
        ));
        let pairing_ctx = Arc::new(PairingContext::new(
            &config,
            registry.clone(),
            reporter.clone(),
        ));

        tracing::info!(
            "Starting node '{}' at {} (shared: {:?}, downloads: {:?})",
            config.nickname,
            local_ip,
            config.shared_dir,
            config.download_dir
        );

        // Discovery
        let discovery_addr = SocketAddr::new(config.bind_ip, config.discovery_port);
        match DiscoveryListener::bind(
            discovery_addr,
            registry.clone(),
            reporter.clone(),
            config.nickname.clone(),
        )
        .await
        {
            Ok(listener) => {
                bound.discovery = listener.local_addr().ok();
                tasks.push(tokio::spawn(listener.run(cancel.clone())));
            }
            Err(e) => reporter.log_error(format!("Peer listener disabled: {}", e)),
        }

        let announcement = Announcement::new(&config.nickname, &local_ip.to_string());
        let target = SocketAddr::new(config.broadcast_ip, config.discovery_port);
        match Broadcaster::bind(SocketAddr::new(config.bind_ip, 0), target, &announcement).await {
            Ok(broadcaster) => tasks.push(tokio::spawn(
                broadcaster.run(config.broadcast_interval(), cancel.clone()),
            )),
            Err(e) => reporter.log_error(format!("Broadcasting disabled: {}", e)),
        }

        tasks.push(tokio::spawn(discovery::run_sweeper(
            registry.clone(),
            reporter.clone(),
            config.sweep_interval(),
            config.peer_timeout(),
            cancel.clone(),
        )));

        // Transfers
        let transfer_addr = SocketAddr::new(config.bind_ip, config.transfer_port);
        match TransferServer::bind(transfer_addr, transfer_ctx.clone()).await {
            Ok(server) => {
                bound.transfer = server.local_addr().ok();
                tasks.push(tokio::spawn(server.run(cancel.clone())));
            }
            Err(e) => reporter.log_error(format!("File server disabled: {}", e)),
        }

        // Pairing
        let pairing_addr = SocketAddr::new(config.bind_ip, config.pairing_port);
        match PairingServer::bind(pairing_addr, pairing_ctx.clone()).await {
            Ok(server) => {
                bound.pairing = server.local_addr().ok();
                tasks.push(tokio::spawn(server.run(cancel.clone())));
            }
            Err(e) => reporter.log_error(format!("QR Connect server disabled: {}", e)),
        }

        Ok(Self {
            config,
            local_ip,
            registry,
            transfers,
            reporter,
            transfer_ctx,
            pairing_ctx,
            bound,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn transfers(&self) -> &ActiveTransfers {
        &self.transfers
    }

    pub fn bound_addrs(&self) -> BoundAddrs {
        self.bound
    }

    /// Send an item and wait for the outcome
    pub async fn send_item(&self, peer_nickname: &str, item_name: &str) -> Result<SendOutcome> {
        transfer::send_item(&self.transfer_ctx, peer_nickname, item_name, &self.cancel).await
    }

    /// Send an item in the background; the outcome is reported as events
    pub fn spawn_send(&self, peer_nickname: String, item_name: String) -> JoinHandle<()> {
        let ctx = self.transfer_ctx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            // Already reported through the context's event sink
            let _ = transfer::send_item(&ctx, &peer_nickname, &item_name, &cancel).await;
        })
    }

    /// Pair with the node behind a scanned connection string (`ip` or `ip:port`)
    pub async fn pair_with(&self, connection: &str) -> Result<String> {
        let result: Result<String> = async {
            let addr = pairing::parse_connection_string(connection, self.config.pairing_port)?;
            self.reporter
                .log(format!("QR Connect: Connecting to {}...", addr));
            pairing::pair_with(&self.pairing_ctx, addr).await
        }
        .await;

        if let Err(e) = &result {
            self.reporter
                .log_error(format!("QR Connect failed for {}: {}", connection.trim(), e));
        }
        result
    }

    /// Text to render as this node's QR code
    pub fn connection_string(&self) -> Result<String> {
        pairing::connection_string(self.local_ip)
    }

    /// Names in the shared directory, sorted, with folders tagged
    pub async fn shareable_items(&self) -> anyhow::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.config.shared_dir)
            .await
            .with_context(|| format!("Failed to list {:?}", self.config.shared_dir))?;

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                items.push(format!("{}{}", name, FOLDER_TAG));
            } else {
                items.push(name);
            }
        }
        items.sort_by_key(|name| name.to_lowercase());
        Ok(items)
    }

    /// Copy a file or folder into the shared directory. Existing items are never overwritten.
    pub async fn add_to_share(&self, source: &Path) -> anyhow::Result<String> {
        let name = source
            .file_name()
            .with_context(|| format!("{:?} has no file name", source))?
            .to_string_lossy()
            .into_owned();
        let target = self.config.shared_dir.join(&name);
        if tokio::fs::try_exists(&target).await? {
            bail!("'{}' already exists in the sharing folder", name);
        }

        let meta = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("Failed to read {:?}", source))?;
        if meta.is_dir() {
            let (src, dst) = (source.to_path_buf(), target.clone());
            tokio::task::spawn_blocking(move || copy_dir_all(&src, &dst))
                .await
                .context("Copy task failed")??;
        } else {
            tokio::fs::copy(source, &target)
                .await
                .with_context(|| format!("Failed to copy {:?}", source))?;
        }

        self.reporter.log(format!("Added '{}' to sharing folder.", name));
        Ok(name)
    }

    /// Delete an item from the shared directory. Accepts tagged folder names.
    pub async fn remove_from_share(&self, item: &str) -> anyhow::Result<()> {
        let name = item.strip_suffix(FOLDER_TAG).unwrap_or(item);
        let (path, is_dir) = transfer::utils::resolve_item(&self.config.shared_dir, name).await?;
        if is_dir {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        self.reporter.log(format!("Deleted '{}'.", name));
        Ok(())
    }

    /// Stop every listener and cancel live transfers, then wait for the listeners to exit
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down node '{}'", self.config.nickname);
        self.cancel.cancel();

        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Service task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ShareNode {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn copy_dir_all(src: &Path, dst: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dst).with_context(|| format!("Failed to create {:?}", dst))?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {:?}", entry.path()))?;
        }
    }
    Ok(())
}

//! TCP file transfer.
//!
//! This module provides:
//! - The transfer server (to receive items, one task per connection)
//! - The transfer client (to send a file or a packed folder)
//! - Shared helpers for file names and partial-file cleanup

pub mod constants;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::ShareConfig;
use crate::registry::PeerRegistry;
use crate::transfers::ActiveTransfers;
use crate::{ItemKind, Reporter, TransferRequest};

// Re-export public API
pub use constants::BUFFER_SIZE;
pub use sender::send_item;
pub use server::{TransferServer, handle_connection};

/// Everything a transfer task needs, shared by all connections
#[derive(Debug, Clone)]
pub struct TransferContext {
    pub nickname: String,
    /// Address reported in handshake responses
    pub local_ip: String,
    pub shared_dir: PathBuf,
    pub download_dir: PathBuf,
    /// Port dialled on peers
    pub transfer_port: u16,
    pub registry: Arc<PeerRegistry>,
    pub transfers: ActiveTransfers,
    pub reporter: Reporter,
    pub decision_tx: mpsc::Sender<TransferRequest>,
    pub io_timeout: Duration,
    pub decision_timeout: Duration,
    pub pairing_grace: Duration,
}

impl TransferContext {
    pub fn new(
        config: &ShareConfig,
        registry: Arc<PeerRegistry>,
        transfers: ActiveTransfers,
        reporter: Reporter,
        decision_tx: mpsc::Sender<TransferRequest>,
    ) -> Self {
        Self {
            nickname: config.nickname.clone(),
            local_ip: config.local_ip().to_string(),
            shared_dir: config.shared_dir.clone(),
            download_dir: config.download_dir.clone(),
            transfer_port: config.transfer_port,
            registry,
            transfers,
            reporter,
            decision_tx,
            io_timeout: config.io_timeout(),
            decision_timeout: config.decision_timeout(),
            pairing_grace: config.pairing_grace(),
        }
    }
}

/// How an outbound attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { bytes: u64 },
    Rejected,
}

/// How an inbound connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Item stored under the download directory (folders already unpacked)
    Received {
        path: PathBuf,
        kind: ItemKind,
        bytes: u64,
    },
    Rejected,
    /// The connection carried a QR handshake instead of a transfer
    Paired { nickname: String },
}

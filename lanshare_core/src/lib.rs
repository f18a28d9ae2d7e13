use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

pub mod archive;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod node;
pub mod pairing;
pub mod progress;
pub mod registry;
pub mod transfer;
pub mod transfers;

pub use codec::{ItemKind, TransferMetadata};
pub use config::ShareConfig;
pub use error::ShareError;
pub use node::ShareNode;
pub use registry::{Peer, PeerRegistry};
pub use transfer::{ReceiveOutcome, SendOutcome};
pub use transfers::ActiveTransfers;

/// Which side of a transfer an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    Send,
    Receive,
}

/// Final state of a transfer as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Rejected,
    Failed(String),
    Cancelled,
}

/// Report from core to the UI layer
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Human-readable activity line
    Log(String),

    Progress {
        direction: TransferDirection,
        /// `0.0..=1.0`
        fraction: f32,
        label: String,
    },

    /// A transfer in `direction` started or stopped streaming
    ActiveChanged {
        direction: TransferDirection,
        active: bool,
    },

    Status {
        direction: TransferDirection,
        item: String,
        status: TransferStatus,
    },

    PeerDiscovered {
        nickname: String,
        address: String,
        device_class: String,
    },

    PeerLost {
        nickname: String,
    },
}

/// Inbound transfer waiting for the user's accept/reject answer.
///
/// Dropping the request without answering counts as a rejection.
#[derive(Debug)]
pub struct TransferRequest {
    pub id: Uuid,
    pub metadata: TransferMetadata,
    pub remote: SocketAddr,
    respond_to: oneshot::Sender<bool>,
}

impl TransferRequest {
    pub(crate) fn new(
        id: Uuid,
        metadata: TransferMetadata,
        remote: SocketAddr,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (respond_to, rx) = oneshot::channel();
        (
            Self {
                id,
                metadata,
                remote,
                respond_to,
            },
            rx,
        )
    }

    pub fn respond(self, accepted: bool) {
        let _ = self.respond_to.send(accepted);
    }

    pub fn accept(self) {
        self.respond(true);
    }

    pub fn reject(self) {
        self.respond(false);
    }
}

/// Sink for [`AppEvent`]s that mirrors every user-visible line into `tracing`.
///
/// Sending never blocks, so it is safe to call from drop guards and while a
/// connection is mid-copy. A dropped receiver just discards events.
#[derive(Debug, Clone)]
pub struct Reporter {
    event_tx: mpsc::UnboundedSender<AppEvent>,
}

impl Reporter {
    pub fn new(event_tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self { event_tx }
    }

    /// Reporter whose events go nowhere
    pub fn detached() -> Self {
        let (event_tx, _) = mpsc::unbounded_channel();
        Self { event_tx }
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.emit(AppEvent::Log(message));
    }

    pub fn log_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.emit(AppEvent::Log(message));
    }

    pub fn progress(&self, direction: TransferDirection, fraction: f32, label: String) {
        self.emit(AppEvent::Progress {
            direction,
            fraction,
            label,
        });
    }

    pub fn status(&self, direction: TransferDirection, item: &str, status: TransferStatus) {
        self.emit(AppEvent::Status {
            direction,
            item: item.to_string(),
            status,
        });
    }

    pub fn peer_discovered(&self, nickname: &str, address: &str, device_class: &str) {
        self.emit(AppEvent::PeerDiscovered {
            nickname: nickname.to_string(),
            address: address.to_string(),
            device_class: device_class.to_string(),
        });
    }

    pub fn peer_lost(&self, nickname: &str) {
        self.emit(AppEvent::PeerLost {
            nickname: nickname.to_string(),
        });
    }

    /// Raise the "active" flag for `direction` until the guard is dropped
    pub fn active(&self, direction: TransferDirection) -> ActiveFlag {
        self.emit(AppEvent::ActiveChanged {
            direction,
            active: true,
        });
        ActiveFlag {
            reporter: self.clone(),
            direction,
        }
    }
}

/// Lowers the "active" flag on drop
#[derive(Debug)]
pub struct ActiveFlag {
    reporter: Reporter,
    direction: TransferDirection,
}

impl Drop for ActiveFlag {
    fn drop(&mut self) {
        self.reporter.emit(AppEvent::ActiveChanged {
            direction: self.direction,
            active: false,
        });
    }
}

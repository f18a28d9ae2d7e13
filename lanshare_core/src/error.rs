use thiserror::Error;

/// Errors produced by discovery, pairing and transfer tasks.
///
/// A `REJECT` answer is not an error: it is reported through
/// [`SendOutcome::Rejected`](crate::transfer::SendOutcome) and
/// [`ReceiveOutcome::Rejected`](crate::transfer::ReceiveOutcome).
#[derive(Debug, Error)]
pub enum ShareError {
    /// Socket bind/connect/accept failures.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed header, missing magic, or a connection that closed before a
    /// complete header line arrived.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("peer '{0}' not found")]
    PeerNotFound(String),

    #[error("item '{0}' not found")]
    ItemNotFound(String),

    #[error("transfer incomplete: received {received}/{expected} bytes")]
    TransferIncomplete { received: u64, expected: u64 },

    /// Packing or unpacking a directory archive failed.
    #[error("archive error: {0}")]
    Archive(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShareError {
    pub(crate) fn network(context: &str, err: std::io::Error) -> Self {
        ShareError::Network(format!("{}: {}", context, err))
    }
}

impl From<serde_json::Error> for ShareError {
    fn from(err: serde_json::Error) -> Self {
        ShareError::Protocol(format!("invalid JSON: {}", err))
    }
}

pub type Result<T, E = ShareError> = std::result::Result<T, E>;

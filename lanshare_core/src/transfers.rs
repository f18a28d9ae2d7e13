//! Bookkeeping for live transfer connections.
//!
//! Each connection task registers itself and holds the returned
//! [`TransferGuard`] for its whole lifetime; dropping the guard removes the
//! entry, whatever path the task exits through.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::TransferDirection;

/// One live transfer connection
#[derive(Debug, Clone)]
pub struct ActiveTransfer {
    pub id: Uuid,
    pub direction: TransferDirection,
    pub remote: SocketAddr,
    cancel: CancellationToken,
}

impl ActiveTransfer {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct Table {
    entries: Mutex<HashMap<Uuid, ActiveTransfer>>,
}

impl Table {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ActiveTransfer>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Table of live transfers, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct ActiveTransfers {
    table: Arc<Table>,
}

impl ActiveTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new transfer whose cancellation follows `parent`.
    pub fn register(
        &self,
        direction: TransferDirection,
        remote: SocketAddr,
        parent: &CancellationToken,
    ) -> TransferGuard {
        let transfer = ActiveTransfer {
            id: Uuid::new_v4(),
            direction,
            remote,
            cancel: parent.child_token(),
        };
        let guard = TransferGuard {
            id: transfer.id,
            cancel: transfer.cancel.clone(),
            table: self.table.clone(),
        };
        self.table.lock().insert(transfer.id, transfer);
        guard
    }

    /// Request cancellation of a transfer. Returns `false` if it is not live.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.table.lock().get(id) {
            Some(transfer) => {
                transfer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<ActiveTransfer> {
        self.table.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<ActiveTransfer> {
        self.table.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

/// Keeps a transfer registered until dropped
#[derive(Debug)]
pub struct TransferGuard {
    id: Uuid,
    cancel: CancellationToken,
    table: Arc<Table>,
}

impl TransferGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.table.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_guard_removes_entry() {
        let transfers = ActiveTransfers::new();
        let shutdown = CancellationToken::new();
        {
            let guard = transfers.register(TransferDirection::Receive, addr(), &shutdown);
            assert_eq!(transfers.len(), 1);
            assert!(transfers.get(&guard.id()).is_some());
        }
        assert!(transfers.is_empty());
    }

    #[test]
    fn test_guard_removed_on_panic() {
        let transfers = ActiveTransfers::new();
        let shutdown = CancellationToken::new();
        let cloned = transfers.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.register(TransferDirection::Send, addr(), &shutdown);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(transfers.is_empty());
    }

    #[test]
    fn test_cancel_by_id_and_by_shutdown() {
        let transfers = ActiveTransfers::new();
        let shutdown = CancellationToken::new();
        let first = transfers.register(TransferDirection::Receive, addr(), &shutdown);
        let second = transfers.register(TransferDirection::Receive, addr(), &shutdown);

        assert!(transfers.cancel(&first.id()));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        shutdown.cancel();
        assert!(second.is_cancelled());
        assert!(!transfers.cancel(&Uuid::new_v4()));
    }
}

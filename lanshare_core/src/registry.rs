//! Shared table of known peers.
//!
//! Discovery and pairing write into it; the transfer client reads peer
//! addresses from it. The lock lives inside [`PeerRegistry`] and is only held
//! for the duration of a map operation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A known remote device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub nickname: String,
    pub address: String,
    pub device_class: String,
    pub last_seen: Instant,
    /// Added through pairing; exempt from timeout eviction
    pub pinned: bool,
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Peer>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or refresh a peer seen just now.
    ///
    /// Returns `true` when the nickname was not known before.
    pub fn upsert(&self, nickname: &str, address: &str, device_class: &str, pin: bool) -> bool {
        self.upsert_at(nickname, address, device_class, pin, Instant::now())
    }

    /// Insert or refresh a peer with an explicit last-seen instant.
    ///
    /// Address and device class are last-write-wins; the pin flag is only ever
    /// raised here, see [`unpin`](Self::unpin) to clear it.
    pub fn upsert_at(
        &self,
        nickname: &str,
        address: &str,
        device_class: &str,
        pin: bool,
        seen_at: Instant,
    ) -> bool {
        let mut peers = self.lock();
        match peers.get_mut(nickname) {
            Some(peer) => {
                peer.address = address.to_string();
                peer.device_class = device_class.to_string();
                peer.pinned |= pin;
                // Keep a pairing grace window that lies further in the future
                peer.last_seen = peer.last_seen.max(seen_at);
                false
            }
            None => {
                peers.insert(
                    nickname.to_string(),
                    Peer {
                        nickname: nickname.to_string(),
                        address: address.to_string(),
                        device_class: device_class.to_string(),
                        last_seen: seen_at,
                        pinned: pin,
                    },
                );
                true
            }
        }
    }

    /// Remove every unpinned peer not refreshed within `timeout` of `now`.
    ///
    /// Returns the nicknames that were evicted.
    pub fn evict_stale(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        self.lock().retain(|nickname, peer| {
            let stale = !peer.pinned && now.saturating_duration_since(peer.last_seen) > timeout;
            if stale {
                evicted.push(nickname.clone());
            }
            !stale
        });
        evicted.sort();
        evicted
    }

    /// Mapping nickname -> address
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.lock()
            .iter()
            .map(|(nickname, peer)| (nickname.clone(), peer.address.clone()))
            .collect()
    }

    pub fn get(&self, nickname: &str) -> Option<Peer> {
        self.lock().get(nickname).cloned()
    }

    pub fn address_of(&self, nickname: &str) -> Option<String> {
        self.lock().get(nickname).map(|peer| peer.address.clone())
    }

    /// All peers ordered by nickname
    pub fn peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.lock().values().cloned().collect();
        peers.sort_by(|a, b| a.nickname.to_lowercase().cmp(&b.nickname.to_lowercase()));
        peers
    }

    /// Clear the pin so the peer ages out like any discovered one.
    pub fn unpin(&self, nickname: &str) -> bool {
        match self.lock().get_mut(nickname) {
            Some(peer) => {
                let was_pinned = peer.pinned;
                peer.pinned = false;
                was_pinned
            }
            None => false,
        }
    }

    pub fn remove(&self, nickname: &str) -> Option<Peer> {
        self.lock().remove(nickname)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

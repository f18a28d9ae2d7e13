//! LAN presence: UDP broadcast announcements, a listener feeding the peer
//! registry, and a sweeper evicting peers that stopped announcing.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::Reporter;
use crate::error::{Result, ShareError};
use crate::registry::PeerRegistry;

/// Identifies our app's datagrams on a shared broadcast domain
pub const BROADCAST_MAGIC: &str = "c0d3-p2p-share-v1";

const MAX_DATAGRAM: usize = 2048;

/// Shortest period accepted by the broadcast and sweep loops
pub const MIN_TICK: Duration = Duration::from_millis(10);

fn ticker(period: Duration) -> tokio::time::Interval {
    // `interval` panics on a zero period
    tokio::time::interval(period.max(MIN_TICK))
}

/// Presence datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(default)]
    pub magic: String,
    pub nickname: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default = "unknown_device")]
    pub device_type: String,
}

fn unknown_device() -> String {
    "unknown".to_string()
}

impl Announcement {
    pub fn new(nickname: &str, ip: &str) -> Self {
        Self {
            magic: BROADCAST_MAGIC.to_string(),
            nickname: nickname.to_string(),
            ip: ip.to_string(),
            device_type: "desktop".to_string(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a datagram, refusing foreign traffic.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let announcement: Announcement = serde_json::from_slice(data)?;
        if announcement.magic != BROADCAST_MAGIC {
            return Err(ShareError::Protocol("missing or wrong magic".to_string()));
        }
        if announcement.nickname.trim().is_empty() {
            return Err(ShareError::Protocol("empty nickname".to_string()));
        }
        Ok(announcement)
    }
}

/// Receives announcements and records peers in the registry
pub struct DiscoveryListener {
    socket: UdpSocket,
    registry: Arc<PeerRegistry>,
    reporter: Reporter,
    my_nickname: String,
}

impl DiscoveryListener {
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<PeerRegistry>,
        reporter: Reporter,
        my_nickname: String,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| ShareError::network(&format!("bind discovery port {}", addr), e))?;
        socket.set_broadcast(true)?;

        Ok(Self {
            socket,
            registry,
            reporter,
            my_nickname,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Process one datagram. Returns the nickname that was refreshed, if any.
    pub fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> Option<String> {
        let announcement = match Announcement::parse(data) {
            Ok(a) => a,
            Err(e) => {
                tracing::debug!("Dropping datagram from {}: {}", from, e);
                return None;
            }
        };

        if announcement.nickname == self.my_nickname {
            return None;
        }

        let address = if announcement.ip.is_empty() {
            from.ip().to_string()
        } else {
            announcement.ip
        };

        let is_new = self.registry.upsert(
            &announcement.nickname,
            &address,
            &announcement.device_type,
            false,
        );
        if is_new {
            self.reporter.log(format!(
                "Discovered peer: {} ({}) at {}",
                announcement.nickname, announcement.device_type, address
            ));
            self.reporter
                .peer_discovered(&announcement.nickname, &address, &announcement.device_type);
        }
        Some(announcement.nickname)
    }

    /// Receive loop; runs until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = [0u8; MAX_DATAGRAM];
        if let Ok(addr) = self.socket.local_addr() {
            self.reporter
                .log(format!("Listening for peers on UDP port {}", addr.port()));
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok((len, from)) => {
                        self.handle_datagram(&buf[..len], from);
                    }
                    Err(e) => {
                        // e.g. ICMP port unreachable surfacing on some platforms
                        tracing::warn!("Peer listen error: {}", e);
                    }
                }
            }
        }
        tracing::info!("Discovery listener stopped");
    }
}

/// Periodically announces this node
pub struct Broadcaster {
    socket: UdpSocket,
    payload: Vec<u8>,
    target: SocketAddr,
}

impl Broadcaster {
    pub async fn bind(
        bind_addr: SocketAddr,
        target: SocketAddr,
        announcement: &Announcement,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| ShareError::network("bind broadcast socket", e))?;
        socket.set_broadcast(true)?;

        Ok(Self {
            socket,
            payload: announcement.to_bytes()?,
            target,
        })
    }

    pub async fn announce(&self) {
        if let Err(e) = self.socket.send_to(&self.payload, self.target).await {
            // Lossy by nature; the next tick retries
            tracing::trace!("Broadcast to {} failed: {}", self.target, e);
        }
    }

    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        tracing::info!("Broadcasting presence to {}", self.target);
        let mut ticker = ticker(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.announce().await,
            }
        }
        tracing::info!("Broadcaster stopped");
    }
}

/// Evict stale peers every `interval`
pub async fn run_sweeper(
    registry: Arc<PeerRegistry>,
    reporter: Reporter,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = ticker(interval);
    // The first tick completes immediately; nothing can be stale yet
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for nickname in registry.evict_stale(Instant::now(), timeout) {
                    reporter.log(format!("Peer {} timed out", nickname));
                    reporter.peer_lost(&nickname);
                }
            }
        }
    }
}

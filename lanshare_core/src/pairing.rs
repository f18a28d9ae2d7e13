//! QR pairing: out-of-band registration of a peer.
//!
//! The listening side publishes its address (rendered as a QR code by the UI);
//! the scanning side connects and both exchange one identity line. The
//! listener always speaks first. Paired peers are pinned in the registry.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::Reporter;
use crate::codec::{self, MAX_IDENTITY_LEN, PairingIdentity};
use crate::config::ShareConfig;
use crate::error::{Result, ShareError};
use crate::registry::PeerRegistry;
use crate::transfer::constants::ACCEPT_RETRY_DELAY;

#[derive(Debug, Clone)]
pub struct PairingContext {
    pub nickname: String,
    pub local_ip: String,
    pub pairing_port: u16,
    pub registry: Arc<PeerRegistry>,
    pub reporter: Reporter,
    /// Bound on connecting and on waiting for the other identity
    pub timeout: Duration,
    /// Freshness granted on top of "now" to a newly paired peer
    pub grace: Duration,
}

impl PairingContext {
    pub fn new(config: &ShareConfig, registry: Arc<PeerRegistry>, reporter: Reporter) -> Self {
        Self {
            nickname: config.nickname.clone(),
            local_ip: config.local_ip().to_string(),
            pairing_port: config.pairing_port,
            registry,
            reporter,
            timeout: config.pairing_timeout(),
            grace: config.pairing_grace(),
        }
    }

    fn identity(&self, status: &str) -> PairingIdentity {
        PairingIdentity::new(&self.nickname, &self.local_ip, status)
    }
}

/// Pin a paired peer in the registry.
///
/// Its last-seen instant is pushed `grace` into the future so that a later
/// `unpin` does not evict it before discovery has had a chance to refresh it.
pub fn register_paired(
    registry: &PeerRegistry,
    reporter: &Reporter,
    identity: &PairingIdentity,
    address: &str,
    grace: Duration,
) -> Result<String> {
    let nickname = identity.nickname.trim();
    if nickname.is_empty() {
        return Err(ShareError::Protocol("pairing identity without nickname".to_string()));
    }

    registry.upsert_at(
        nickname,
        address,
        &identity.device_type,
        true,
        Instant::now() + grace,
    );
    reporter.log(format!(
        "QR Connect: Added peer '{}' ({}) at {}",
        nickname, identity.device_type, address
    ));
    reporter.peer_discovered(nickname, address, &identity.device_type);
    Ok(nickname.to_string())
}

/// Address to publish for scanning: this machine's LAN IP.
pub fn connection_string(local_ip: IpAddr) -> Result<String> {
    if local_ip.is_loopback() || local_ip.is_unspecified() {
        return Err(ShareError::Network(
            "could not get a valid LAN address".to_string(),
        ));
    }
    Ok(local_ip.to_string())
}

/// Parse a scanned connection string, either `ip` or `ip:port`.
pub fn parse_connection_string(text: &str, default_port: u16) -> Result<SocketAddr> {
    let text = text.trim();
    if let Ok(addr) = text.parse::<SocketAddr>() {
        return Ok(addr);
    }
    text.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| ShareError::Protocol(format!("invalid connection string '{}'", text)))
}

/// Accepts pairing connections on the pairing port
pub struct PairingServer {
    listener: TcpListener,
    ctx: Arc<PairingContext>,
}

impl PairingServer {
    pub async fn bind(addr: SocketAddr, ctx: Arc<PairingContext>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ShareError::network(&format!("bind pairing port {}", addr), e))?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            self.ctx
                .reporter
                .log(format!("QR Connect server listening on {}", addr));
        }

        loop {
            let (stream, remote) = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        self.ctx.reporter.log_error(format!("QR accept error: {}", e));
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                }
            };

            self.ctx
                .reporter
                .log(format!("QR connection received from {}", remote.ip()));
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_pairing(stream, remote, &ctx).await {
                    ctx.reporter.log(format!(
                        "QR connection from {} did not complete: {}",
                        remote.ip(),
                        e
                    ));
                }
            });
        }
        tracing::info!("QR Connect server stopped");
    }
}

/// Listener side: send our identity, then wait for the peer's.
pub async fn handle_pairing<S>(
    mut stream: S,
    remote: SocketAddr,
    ctx: &PairingContext,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    codec::write_json_line(&mut stream, &ctx.identity("ready")).await?;
    tracing::debug!("Sent our info to {}", remote.ip());

    let peer: PairingIdentity = tokio::time::timeout(
        ctx.timeout,
        codec::read_json_line(&mut stream, MAX_IDENTITY_LEN),
    )
    .await
    .map_err(|_| ShareError::Timeout("waiting for peer identity"))??;

    let address = peer
        .ip
        .clone()
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| remote.ip().to_string());
    register_paired(&ctx.registry, &ctx.reporter, &peer, &address, ctx.grace)
}

/// Connector side: read the listener's identity first, then send ours.
///
/// The peer is pinned as soon as its identity arrives; failing to send our own
/// identity afterwards only means the other side did not learn about us.
pub async fn pair_with(ctx: &PairingContext, addr: SocketAddr) -> Result<String> {
    let mut stream = tokio::time::timeout(ctx.timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ShareError::Timeout("connecting for pairing"))?
        .map_err(|e| ShareError::network(&format!("connect to {}", addr), e))?;

    let peer: PairingIdentity = tokio::time::timeout(
        ctx.timeout,
        codec::read_json_line(&mut stream, MAX_IDENTITY_LEN),
    )
    .await
    .map_err(|_| ShareError::Timeout("waiting for listener identity"))??;

    let address = peer
        .ip
        .clone()
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| addr.ip().to_string());
    let nickname = register_paired(&ctx.registry, &ctx.reporter, &peer, &address, ctx.grace)?;

    if let Err(e) = codec::write_json_line(&mut stream, &ctx.identity("connected")).await {
        tracing::warn!("Paired with {} but could not send our identity: {}", nickname, e);
    }
    Ok(nickname)
}

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::constants::ACCEPT_RETRY_DELAY;
use super::receiver::receive_transfer;
use super::{ReceiveOutcome, TransferContext};
use crate::codec::{self, Header, PairingIdentity, QR_HANDSHAKE_RESPONSE};
use crate::error::{Result, ShareError};
use crate::{TransferDirection, pairing};

/// Accepts inbound transfers on the transfer port
pub struct TransferServer {
    listener: TcpListener,
    ctx: Arc<TransferContext>,
}

impl TransferServer {
    pub async fn bind(addr: SocketAddr, ctx: Arc<TransferContext>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ShareError::network(&format!("bind transfer port {}", addr), e))?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; each connection runs in its own task until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            self.ctx
                .reporter
                .log(format!("File server listening on {}", addr));
        }

        loop {
            let (stream, remote) = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        self.ctx.reporter.log_error(format!("Accept error: {}", e));
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                }
            };

            self.ctx
                .reporter
                .log(format!("Incoming connection from {}", remote.ip()));
            let ctx = self.ctx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, remote, &ctx, &cancel).await {
                    ctx.reporter
                        .log_error(format!("Receive failed from {}: {}", remote.ip(), e));
                }
            });
        }
        tracing::info!("File server stopped");
    }
}

/// Drive one inbound connection from header to completion.
///
/// The connection is registered in the active-transfer table for as long as
/// this future runs.
pub async fn handle_connection<S>(
    mut stream: S,
    remote: SocketAddr,
    ctx: &TransferContext,
    cancel: &CancellationToken,
) -> Result<ReceiveOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let guard = ctx
        .transfers
        .register(TransferDirection::Receive, remote, cancel);

    let (header, rest) = tokio::time::timeout(ctx.io_timeout, codec::read_header(&mut stream))
        .await
        .map_err(|_| ShareError::Timeout("waiting for header"))??;

    match header {
        Header::QrHandshake(identity) => {
            tracing::info!("Detected QR handshake from {}", remote.ip());
            let nickname = pairing::register_paired(
                &ctx.registry,
                &ctx.reporter,
                &identity,
                &remote.ip().to_string(),
                ctx.pairing_grace,
            )?;

            let response = PairingIdentity::new(&ctx.nickname, &ctx.local_ip, "connected")
                .tagged(QR_HANDSHAKE_RESPONSE);
            codec::write_json_line(&mut stream, &response).await?;
            Ok(ReceiveOutcome::Paired { nickname })
        }
        Header::TransferRequest(metadata) => {
            receive_transfer(&mut stream, rest, metadata, remote, ctx, &guard).await
        }
    }
}

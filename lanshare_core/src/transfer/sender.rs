use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::utils::{copy_buffer, resolve_item};
use super::{SendOutcome, TransferContext};
use crate::codec::{self, Decision, ItemKind, TransferMetadata};
use crate::error::{Result, ShareError};
use crate::progress::{ProgressThrottle, completed_label, fraction, progress_label};
use crate::transfers::TransferGuard;
use crate::{TransferDirection, TransferStatus, archive};

/// Send one item from the shared directory to a known peer.
///
/// Every outcome, including failures and rejections, is also reported through
/// the context's [`Reporter`](crate::Reporter).
pub async fn send_item(
    ctx: &TransferContext,
    peer_nickname: &str,
    item_name: &str,
    cancel: &CancellationToken,
) -> Result<SendOutcome> {
    let result = try_send_item(ctx, peer_nickname, item_name, cancel).await;

    match &result {
        Ok(SendOutcome::Delivered { .. }) => {
            ctx.reporter
                .status(TransferDirection::Send, item_name, TransferStatus::Completed);
        }
        Ok(SendOutcome::Rejected) => {
            ctx.reporter
                .log(format!("Transfer rejected by {}.", peer_nickname));
            ctx.reporter
                .status(TransferDirection::Send, item_name, TransferStatus::Rejected);
        }
        Err(ShareError::PeerNotFound(_)) => {
            ctx.reporter
                .log(format!("Peer '{}' not found.", peer_nickname));
        }
        Err(ShareError::ItemNotFound(_)) => {
            ctx.reporter.log(format!("Item '{}' not found.", item_name));
        }
        Err(ShareError::Cancelled) => {
            ctx.reporter
                .log(format!("Sending '{}' was cancelled.", item_name));
            ctx.reporter
                .status(TransferDirection::Send, item_name, TransferStatus::Cancelled);
        }
        Err(e) => {
            ctx.reporter
                .log_error(format!("Send failed for '{}': {}", item_name, e));
            ctx.reporter.status(
                TransferDirection::Send,
                item_name,
                TransferStatus::Failed(e.to_string()),
            );
        }
    }

    result
}

/// Payload prepared for the wire; a packed folder lives in a temp file that
/// is deleted when this is dropped.
struct Payload {
    path: PathBuf,
    wire_name: String,
    kind: ItemKind,
    _archive: Option<NamedTempFile>,
}

async fn prepare_payload(item_path: PathBuf, item_name: &str, is_dir: bool) -> Result<Payload> {
    if !is_dir {
        return Ok(Payload {
            path: item_path,
            wire_name: item_name.to_string(),
            kind: ItemKind::File,
            _archive: None,
        });
    }

    let temp = tempfile::Builder::new()
        .prefix(&format!("{}-", item_name))
        .suffix(&format!(".{}", archive::ARCHIVE_EXTENSION))
        .tempfile()
        .map_err(|e| ShareError::Archive(format!("create temp archive: {}", e)))?;
    let archive_path = temp.path().to_path_buf();

    let src = item_path.clone();
    let target = archive_path.clone();
    tokio::task::spawn_blocking(move || archive::pack_directory(&src, &target))
        .await
        .map_err(|e| ShareError::Archive(format!("pack task failed: {}", e)))??;

    Ok(Payload {
        path: archive_path,
        wire_name: format!("{}.{}", item_name, archive::ARCHIVE_EXTENSION),
        kind: ItemKind::Directory,
        _archive: Some(temp),
    })
}

async fn try_send_item(
    ctx: &TransferContext,
    peer_nickname: &str,
    item_name: &str,
    cancel: &CancellationToken,
) -> Result<SendOutcome> {
    let peer_ip = ctx
        .registry
        .address_of(peer_nickname)
        .ok_or_else(|| ShareError::PeerNotFound(peer_nickname.to_string()))?;
    let (item_path, is_dir) = resolve_item(&ctx.shared_dir, item_name).await?;

    let payload = prepare_payload(item_path, item_name, is_dir).await?;
    let filesize = tokio::fs::metadata(&payload.path).await?.len();
    let metadata = TransferMetadata {
        filename: payload.wire_name.clone(),
        filesize,
        kind: payload.kind,
        sender_nickname: ctx.nickname.clone(),
    };

    ctx.reporter.log(format!(
        "Connecting to {} at {}:{}",
        peer_nickname, peer_ip, ctx.transfer_port
    ));
    let mut stream = tokio::time::timeout(
        ctx.io_timeout,
        TcpStream::connect((peer_ip.as_str(), ctx.transfer_port)),
    )
    .await
    .map_err(|_| ShareError::Timeout("connecting to peer"))?
    .map_err(|e| ShareError::network(&format!("connect to {}", peer_ip), e))?;

    let remote = stream.peer_addr()?;
    let guard = ctx
        .transfers
        .register(TransferDirection::Send, remote, cancel);

    codec::write_header(&mut stream, &metadata).await?;

    // The receiver may be waiting on a person, so allow the full decision window
    let decision = tokio::select! {
        _ = guard.token().cancelled() => return Err(ShareError::Cancelled),
        res = tokio::time::timeout(
            ctx.decision_timeout + ctx.io_timeout,
            codec::read_decision(&mut stream),
        ) => res.map_err(|_| ShareError::Timeout("waiting for accept/reject"))??,
    };
    if decision == Decision::Reject {
        return Ok(SendOutcome::Rejected);
    }

    let _active = ctx.reporter.active(TransferDirection::Send);
    let title = format!("{} to {}", item_name, peer_nickname);
    let sent = stream_file(&mut stream, &payload.path, filesize, &title, ctx, &guard).await?;
    stream.shutdown().await?;

    ctx.reporter.progress(
        TransferDirection::Send,
        1.0,
        completed_label(item_name),
    );
    ctx.reporter
        .log(format!("'{}' sent to {}.", item_name, peer_nickname));

    Ok(SendOutcome::Delivered { bytes: sent })
}

async fn stream_file(
    stream: &mut TcpStream,
    path: &Path,
    filesize: u64,
    title: &str,
    ctx: &TransferContext,
    guard: &TransferGuard,
) -> Result<u64> {
    let mut file = File::open(path).await?;
    let mut buffer = copy_buffer(filesize);
    let mut throttle = ProgressThrottle::new();
    let mut sent: u64 = 0;

    while sent < filesize {
        if guard.is_cancelled() {
            return Err(ShareError::Cancelled);
        }

        let to_read = (buffer.len() as u64).min(filesize - sent) as usize;
        let n = file.read(&mut buffer[..to_read]).await?;
        if n == 0 {
            // File shrank after the header was sent
            return Err(ShareError::TransferIncomplete {
                received: sent,
                expected: filesize,
            });
        }

        tokio::select! {
            _ = guard.token().cancelled() => return Err(ShareError::Cancelled),
            res = tokio::time::timeout(ctx.io_timeout, stream.write_all(&buffer[..n])) => {
                res.map_err(|_| ShareError::Timeout("sending payload"))??
            }
        }
        sent += n as u64;

        if throttle.ready() {
            ctx.reporter.progress(
                TransferDirection::Send,
                fraction(sent, filesize),
                progress_label(title, sent, filesize),
            );
        }
    }

    Ok(sent)
}

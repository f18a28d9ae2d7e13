use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::utils::{PartialFile, copy_buffer, sanitize_file_name};
use super::{ReceiveOutcome, TransferContext};
use crate::codec::{self, Decision, ItemKind, TransferMetadata};
use crate::error::{Result, ShareError};
use crate::progress::{ProgressThrottle, completed_label, fraction, progress_label};
use crate::transfers::TransferGuard;
use crate::{TransferDirection, TransferRequest, TransferStatus, archive};

/// Handle a transfer request: ask for a decision, then stream the payload.
///
/// `leftover` holds payload bytes that arrived in the same read as the header.
pub async fn receive_transfer<S>(
    stream: &mut S,
    leftover: BytesMut,
    metadata: TransferMetadata,
    remote: SocketAddr,
    ctx: &TransferContext,
    guard: &TransferGuard,
) -> Result<ReceiveOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let file_name = sanitize_file_name(&metadata.filename);
    let sender = if metadata.sender_nickname.is_empty() {
        remote.ip().to_string()
    } else {
        metadata.sender_nickname.clone()
    };
    ctx.reporter.log(format!(
        "Incoming transfer request: '{}' ({} bytes) from {}",
        file_name, metadata.filesize, sender
    ));

    let accepted = request_decision(ctx, guard, metadata.clone(), remote).await;
    codec::write_decision(stream, Decision::from_accepted(accepted)).await?;

    if !accepted {
        ctx.reporter
            .log(format!("Rejected '{}' from {}.", file_name, sender));
        ctx.reporter.status(
            TransferDirection::Receive,
            &file_name,
            TransferStatus::Rejected,
        );
        return Ok(ReceiveOutcome::Rejected);
    }

    let _active = ctx.reporter.active(TransferDirection::Receive);
    match store_payload(stream, leftover, &metadata, &file_name, ctx, guard).await {
        Ok(outcome) => {
            ctx.reporter.status(
                TransferDirection::Receive,
                &file_name,
                TransferStatus::Completed,
            );
            Ok(outcome)
        }
        Err(e) => {
            let status = match e {
                ShareError::Cancelled => TransferStatus::Cancelled,
                _ => TransferStatus::Failed(e.to_string()),
            };
            ctx.reporter
                .status(TransferDirection::Receive, &file_name, status);
            Err(e)
        }
    }
}

/// Publish the request to the decision handler and wait for its answer.
///
/// No handler, a dropped responder, a timeout or a cancelled transfer all
/// count as a rejection. The timeout also covers queueing on a full channel.
async fn request_decision(
    ctx: &TransferContext,
    guard: &TransferGuard,
    metadata: TransferMetadata,
    remote: SocketAddr,
) -> bool {
    let id: Uuid = guard.id();
    let (request, answer) = TransferRequest::new(id, metadata, remote);
    let exchange = async {
        if ctx.decision_tx.send(request).await.is_err() {
            tracing::warn!("No decision handler, rejecting transfer {}", id);
            return false;
        }
        answer.await.unwrap_or(false)
    };

    tokio::select! {
        _ = guard.token().cancelled() => false,
        res = tokio::time::timeout(ctx.decision_timeout, exchange) => match res {
            Ok(accepted) => accepted,
            Err(_) => {
                ctx.reporter.log(format!("No answer for transfer {} in time, rejecting", id));
                false
            }
        }
    }
}

async fn store_payload<S>(
    stream: &mut S,
    leftover: BytesMut,
    metadata: &TransferMetadata,
    file_name: &str,
    ctx: &TransferContext,
    guard: &TransferGuard,
) -> Result<ReceiveOutcome>
where
    S: AsyncRead + Unpin,
{
    tokio::fs::create_dir_all(&ctx.download_dir).await?;
    let partial = PartialFile::new(ctx.download_dir.join(file_name));
    let total = metadata.filesize;

    let received = {
        let mut file = File::create(partial.path()).await?;
        let received = copy_to_file(stream, &mut file, leftover, total, file_name, ctx, guard).await?;
        file.flush().await?;
        received
    };

    if received < total {
        return Err(ShareError::TransferIncomplete {
            received,
            expected: total,
        });
    }

    ctx.reporter.progress(
        TransferDirection::Receive,
        1.0,
        completed_label(file_name),
    );
    ctx.reporter
        .log(format!("'{}' received successfully.", file_name));

    match metadata.kind {
        ItemKind::File => Ok(ReceiveOutcome::Received {
            path: partial.keep(),
            kind: ItemKind::File,
            bytes: received,
        }),
        ItemKind::Directory => {
            // `partial` still owns the archive and removes it on every path
            let archive_path = partial.path().to_path_buf();
            let dest = ctx.download_dir.clone();
            let unpacked =
                tokio::task::spawn_blocking(move || archive::unpack_archive(&archive_path, &dest))
                    .await
                    .map_err(|e| ShareError::Archive(format!("unpack task failed: {}", e)))
                    .and_then(|res| res);
            drop(partial);

            if let Err(e) = unpacked {
                ctx.reporter
                    .log_error(format!("Error unpacking folder: {}", e));
                return Err(e);
            }
            ctx.reporter.log(format!("Folder '{}' unpacked.", file_name));

            let folder = file_name
                .strip_suffix(&format!(".{}", archive::ARCHIVE_EXTENSION))
                .unwrap_or(file_name);
            Ok(ReceiveOutcome::Received {
                path: ctx.download_dir.join(folder),
                kind: ItemKind::Directory,
                bytes: received,
            })
        }
    }
}

/// Copy up to `total` bytes from the socket into `file`, starting with `leftover`.
///
/// Returns the number of bytes written; less than `total` means the peer
/// closed early.
async fn copy_to_file<S>(
    stream: &mut S,
    file: &mut File,
    leftover: BytesMut,
    total: u64,
    file_name: &str,
    ctx: &TransferContext,
    guard: &TransferGuard,
) -> Result<u64>
where
    S: AsyncRead + Unpin,
{
    let mut received: u64 = 0;
    if !leftover.is_empty() {
        let take = (leftover.len() as u64).min(total) as usize;
        file.write_all(&leftover[..take]).await?;
        received += take as u64;
    }

    let mut buffer = copy_buffer(total);
    let mut throttle = ProgressThrottle::new();

    while received < total {
        let to_read = (buffer.len() as u64).min(total - received) as usize;
        let n = tokio::select! {
            _ = guard.token().cancelled() => return Err(ShareError::Cancelled),
            res = tokio::time::timeout(ctx.io_timeout, stream.read(&mut buffer[..to_read])) => {
                res.map_err(|_| ShareError::Timeout("receiving payload"))??
            }
        };
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n]).await?;
        received += n as u64;

        if throttle.ready() {
            ctx.reporter.progress(
                TransferDirection::Receive,
                fraction(received, total),
                progress_label(file_name, received, total),
            );
        }
    }

    Ok(received)
}

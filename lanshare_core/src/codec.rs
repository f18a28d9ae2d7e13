//! Wire format shared by the transfer server, the transfer client and the
//! pairing service.
//!
//! Every control message is a single line of UTF-8 terminated by `\n`:
//! a JSON header from the sender, then an `ACCEPT`/`REJECT` token from the
//! receiver, then (when accepted) exactly `filesize` raw bytes.

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ShareError};

/// Upper bound for a header line
pub const MAX_HEADER_LEN: usize = 64 * 1024;
/// Upper bound for a pairing identity line
pub const MAX_IDENTITY_LEN: usize = 4096;
/// Upper bound for the `ACCEPT`/`REJECT` line
const MAX_DECISION_LEN: usize = 64;

const READ_CHUNK: usize = 1024;

pub const QR_HANDSHAKE: &str = "qr_handshake";
pub const QR_HANDSHAKE_RESPONSE: &str = "qr_handshake_response";

/// Kind of item carried by a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    File,
    /// Payload is an archive to unpack after receipt
    Directory,
}

/// Describes one transfer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub filename: String,
    pub filesize: u64,
    #[serde(rename = "type", default)]
    pub kind: ItemKind,
    #[serde(alias = "senderNickname", default)]
    pub sender_nickname: String,
}

/// Identity exchanged during pairing.
///
/// On the transfer port the same object carries a `type` tag
/// (`qr_handshake` / `qr_handshake_response`); on the pairing port it does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingIdentity {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

fn default_device_type() -> String {
    "android".to_string()
}

impl PairingIdentity {
    pub fn new(nickname: &str, ip: &str, status: &str) -> Self {
        Self {
            kind: None,
            nickname: nickname.to_string(),
            ip: Some(ip.to_string()),
            device_type: "desktop".to_string(),
            status: Some(status.to_string()),
        }
    }

    pub fn tagged(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }
}

/// First line received on the transfer port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    TransferRequest(TransferMetadata),
    QrHandshake(PairingIdentity),
}

impl Header {
    /// Parse one header line (without the trailing newline).
    pub fn parse(line: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(line)?;
        let object = value
            .as_object()
            .ok_or_else(|| ShareError::Protocol("header is not a JSON object".to_string()))?;

        if object.get("type").and_then(Value::as_str) == Some(QR_HANDSHAKE) {
            let identity: PairingIdentity = serde_json::from_value(value)?;
            return Ok(Header::QrHandshake(identity));
        }

        if !object.contains_key("filename") || !object.contains_key("filesize") {
            return Err(ShareError::Protocol(
                "missing required fields in metadata".to_string(),
            ));
        }
        Ok(Header::TransferRequest(serde_json::from_value(value)?))
    }
}

/// Receiver's answer to a transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn from_accepted(accepted: bool) -> Self {
        if accepted {
            Decision::Accept
        } else {
            Decision::Reject
        }
    }

    pub fn as_wire(self) -> &'static [u8] {
        match self {
            Decision::Accept => b"ACCEPT\n",
            Decision::Reject => b"REJECT\n",
        }
    }

    /// Anything other than `ACCEPT` is treated as a rejection.
    pub fn parse(line: &[u8]) -> Self {
        if line.trim_ascii() == b"ACCEPT" {
            Decision::Accept
        } else {
            Decision::Reject
        }
    }
}

/// Read until the first `\n`.
///
/// Returns the line without its terminator and whatever bytes followed it in
/// the same reads. Those trailing bytes belong to the next protocol phase and
/// must not be dropped.
pub async fn read_line<R>(reader: &mut R, max_len: usize) -> Result<(BytesMut, BytesMut)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut scanned = 0;

    loop {
        if let Some(pos) = buf[scanned..].iter().position(|&b| b == b'\n') {
            let newline = scanned + pos;
            let mut line = buf.split_to(newline + 1);
            line.truncate(newline);
            return Ok((line, buf));
        }
        scanned = buf.len();

        if buf.len() >= max_len {
            return Err(ShareError::Protocol(format!(
                "line exceeds {} bytes",
                max_len
            )));
        }

        buf.reserve(READ_CHUNK);
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(ShareError::Protocol(if buf.is_empty() {
                "connection closed before header".to_string()
            } else {
                "connection closed mid-header".to_string()
            }));
        }
    }
}

/// Read and parse the transfer-port header.
pub async fn read_header<R>(reader: &mut R) -> Result<(Header, BytesMut)>
where
    R: AsyncRead + Unpin,
{
    let (line, rest) = read_line(reader, MAX_HEADER_LEN).await?;
    let header = Header::parse(&line)?;
    Ok((header, rest))
}

/// Serialize `value` as one JSON line.
pub async fn write_json_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_vec(value)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one JSON line, ignoring anything after the newline.
pub async fn read_json_line<R, T>(reader: &mut R, max_len: usize) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let (line, _rest) = read_line(reader, max_len).await?;
    Ok(serde_json::from_slice(line.trim_ascii())?)
}

pub async fn write_header<W>(writer: &mut W, metadata: &TransferMetadata) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_json_line(writer, metadata).await
}

pub async fn write_decision<W>(writer: &mut W, decision: Decision) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(decision.as_wire()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the receiver's one-line answer.
///
/// The receiver never sends anything after the token, so surplus bytes are
/// reported as a protocol violation.
pub async fn read_decision<R>(reader: &mut R) -> Result<Decision>
where
    R: AsyncRead + Unpin,
{
    let (line, rest) = read_line(reader, MAX_DECISION_LEN).await?;
    if !rest.is_empty() {
        return Err(ShareError::Protocol(
            "unexpected bytes after decision".to_string(),
        ));
    }
    Ok(Decision::parse(&line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transfer_request() {
        let line =
            br#"{"filename":"a.txt","filesize":5,"type":"file","sender_nickname":"X"}"#;
        match Header::parse(line).unwrap() {
            Header::TransferRequest(meta) => {
                assert_eq!(meta.filename, "a.txt");
                assert_eq!(meta.filesize, 5);
                assert_eq!(meta.kind, ItemKind::File);
                assert_eq!(meta.sender_nickname, "X");
            }
            other => panic!("Expected transfer request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_camel_case_sender() {
        let line = br#"{"filename":"d.tar","filesize":1,"type":"directory","senderNickname":"Y"}"#;
        match Header::parse(line).unwrap() {
            Header::TransferRequest(meta) => {
                assert_eq!(meta.kind, ItemKind::Directory);
                assert_eq!(meta.sender_nickname, "Y");
            }
            other => panic!("Expected transfer request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_qr_handshake() {
        let line = br#"{"type":"qr_handshake","nickname":"phone"}"#;
        match Header::parse(line).unwrap() {
            Header::QrHandshake(identity) => {
                assert_eq!(identity.nickname, "phone");
                assert_eq!(identity.device_type, "android");
            }
            other => panic!("Expected handshake, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_fields_is_protocol_error() {
        let err = Header::parse(br#"{"filename":"a.txt"}"#).unwrap_err();
        assert!(matches!(err, ShareError::Protocol(_)));

        let err = Header::parse(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, ShareError::Protocol(_)));
    }

    #[test]
    fn test_decision_tokens() {
        assert_eq!(Decision::parse(b"ACCEPT"), Decision::Accept);
        assert_eq!(Decision::parse(b"ACCEPT\r"), Decision::Accept);
        assert_eq!(Decision::parse(b"REJECT"), Decision::Reject);
        assert_eq!(Decision::parse(b"garbage"), Decision::Reject);
        assert_eq!(Decision::Accept.as_wire(), b"ACCEPT\n");
    }

    #[tokio::test]
    async fn test_read_line_keeps_trailing_payload() {
        let mut input: &[u8] = b"{\"filename\":\"a\",\"filesize\":3}\nabc";
        let (header, rest) = read_header(&mut input).await.unwrap();
        assert!(matches!(header, Header::TransferRequest(_)));
        assert_eq!(&rest[..], b"abc");
    }

    #[tokio::test]
    async fn test_read_line_rejects_oversized() {
        let data = vec![b'x'; 200];
        let mut input: &[u8] = &data;
        let err = read_line(&mut input, 100).await.unwrap_err();
        assert!(matches!(err, ShareError::Protocol(_)));
    }
}

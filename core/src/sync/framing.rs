//! Length-prefixed message framing
//!
//! Each frame is a 4-byte big-endian length followed by the payload. The
//! reader reassembles partial reads with `read_exact` and rejects declared
//! lengths above [`MAX_MESSAGE_SIZE`].

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::constants::MAX_MESSAGE_SIZE;
use crate::{Error, Result};

/// Read a length-prefixed message from an async reader.
///
/// EOF before the length prefix is a closed connection (`Error::Network`);
/// EOF inside the payload is a truncated frame (`Error::Protocol`).
pub async fn read_framed_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => Error::Network("connection closed by peer".to_string()),
        _ => Error::Network(e.to_string()),
    })?;

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(Error::Protocol(format!(
            "message too large: {} bytes (max {})",
            len, MAX_MESSAGE_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            Error::Protocol(format!("truncated frame: expected {} bytes", len))
        }
        _ => Error::Network(e.to_string()),
    })?;

    Ok(payload)
}

/// Reject payloads no peer would accept
pub fn check_frame_size(len: usize) -> Result<()> {
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::Protocol(format!(
            "message too large: {} bytes (max {})",
            len, MAX_MESSAGE_SIZE
        )));
    }
    Ok(())
}

/// Write a length-prefixed message to an async writer and flush it.
pub async fn write_framed_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<()> {
    check_frame_size(payload.len())?;

    // Prefix and payload in a single write
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);

    writer
        .write_all(&frame)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    writer
        .flush()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(())
}

//! Length-prefixed framing and message serialization.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes.
//! Session frames carry `encrypt(envelope_json, session_key)`.

use std::time::Duration;

use strand_crypto::SessionKey;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Envelope, ProtocolError, WireMessage};

/// Maximum frame body size in bytes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let len_bytes = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len_bytes).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Oversized lengths are rejected before allocating.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    read_frame_bounded(reader, MAX_FRAME_SIZE).await
}

/// Read one frame whose body may not exceed `max` bytes.
pub async fn read_frame_bounded<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf).await {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed,
            _ => ProtocolError::Io(e),
        });
    }

    let body_len = u32::from_be_bytes(len_buf) as usize;
    if body_len > max {
        return Err(ProtocolError::FrameTooLarge {
            size: body_len,
            max,
        });
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// [`read_frame`] bounded by `timeout`.
pub async fn read_frame_timeout<R>(
    reader: &mut R,
    timeout: Duration,
    what: &'static str,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, read_frame(reader))
        .await
        .map_err(|_| ProtocolError::Timeout(what))?
}

/// Serialize a message for the envelope content.
pub fn encode_message(message: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(message).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Deserialize envelope content.
pub fn decode_message(data: &[u8]) -> Result<WireMessage, ProtocolError> {
    bincode::deserialize(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Encrypt an envelope's JSON under the connection's session key.
pub fn encode_session_frame(
    envelope: &Envelope,
    key: &SessionKey,
) -> Result<Vec<u8>, ProtocolError> {
    let json = envelope.to_json()?;
    Ok(strand_crypto::encrypt(json.as_bytes(), key)?)
}

/// Decrypt and parse a session frame.
pub fn decode_session_frame(frame: &[u8], key: &SessionKey) -> Result<Envelope, ProtocolError> {
    let json = strand_crypto::decrypt(frame, key)?;
    Envelope::from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_types::{BlockHash, ChainTip};

    #[tokio::test]
    async fn frame_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello").await.unwrap();
        write_frame(&mut a, b"").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), b"hello");
        assert!(read_frame(&mut b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        a.write_all(&len).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn closed_stream_reports_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(
            read_frame(&mut b).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn read_timeout_fires() {
        let (_a, mut b) = tokio::io::duplex(64);
        let res = read_frame_timeout(&mut b, Duration::from_millis(20), "test frame").await;
        assert!(matches!(res, Err(ProtocolError::Timeout("test frame"))));
    }

    #[test]
    fn message_roundtrip() {
        let msg = WireMessage::Reorg {
            tip: ChainTip {
                index: 4,
                hash: BlockHash::new([3; 32]),
            },
        };
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(decode_message(&bytes).unwrap(), msg);
        assert!(decode_message(&[0xff; 3]).is_err());
    }
}

//! Length-delimited message framing
//!
//! TCP delivers a byte stream; the protocol deals in whole messages. Each
//! frame on the wire is `u32 LE length + body`, one frame per logical
//! message. Framing is the transport's concern only - the command envelope
//! inside the body never sees it.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use align_core::{AlignError, AlignResult};

/// Upper bound on one framed message. Protects the receive loop from a
/// hostile or corrupted length prefix.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Write one message as a single frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> AlignResult<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(AlignError::MessageTooLarge(payload.len()));
    }

    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .map_err(|e| AlignError::TransportError(e.to_string()))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| AlignError::TransportError(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| AlignError::TransportError(e.to_string()))?;
    Ok(())
}

/// Read one frame. Returns the message body, or an error on stream
/// close / oversized length prefix.
pub async fn read_frame<R>(reader: &mut R) -> AlignResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| AlignError::TransportError(e.to_string()))?;

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(AlignError::MessageTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| AlignError::TransportError(e.to_string()))?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        write_frame(&mut a, b"hello frame").await.unwrap();
        write_frame(&mut a, b"").await.unwrap();

        assert_eq!(read_frame(&mut b).await.unwrap(), b"hello frame");
        assert_eq!(read_frame(&mut b).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let bogus_len = (MAX_MESSAGE_SIZE as u32 + 1).to_le_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &bogus_len)
            .await
            .unwrap();

        assert!(matches!(
            read_frame(&mut b).await,
            Err(AlignError::MessageTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let (mut a, _b) = tokio::io::duplex(64);
        let payload = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            write_frame(&mut a, &payload).await,
            Err(AlignError::MessageTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_on_closed_stream_is_error() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.is_err());
    }
}

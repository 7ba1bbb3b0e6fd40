//! Length-delimited JSON framing for stream transports.
//!
//! Wire format: u32 big-endian byte length, then that many bytes of a
//! JSON object. A frame above the size cap kills the connection; a
//! malformed length cannot allocate unbounded memory.

use crate::errors::TransportError;
use shared_types::Frame;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame (1 MiB). Pub/sub payloads stay far below this.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Write one frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), TransportError> {
    let bytes =
        serde_json::to_vec(frame).map_err(|e| TransportError::BadFrame(e.to_string()))?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(TransportError::BadFrame(format!(
            "frame of {} bytes exceeds cap",
            bytes.len()
        )));
    }
    writer
        .write_all(&(bytes.len() as u32).to_be_bytes())
        .await
        .map_err(|e| TransportError::Unreachable(e.to_string()))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| TransportError::Unreachable(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::Unreachable(e.to_string()))?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on clean EOF at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Frame>, TransportError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::Unreachable(e.to_string())),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::BadFrame(format!(
            "declared frame of {len} bytes exceeds cap"
        )));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| TransportError::Unreachable(e.to_string()))?;

    let frame =
        serde_json::from_slice(&payload).map_err(|e| TransportError::BadFrame(e.to_string()))?;
    Ok(Some(frame))
}

/// Encode a frame for datagram transports (no length prefix; one frame
/// per datagram).
pub fn encode_datagram(frame: &Frame) -> Result<Vec<u8>, TransportError> {
    let bytes =
        serde_json::to_vec(frame).map_err(|e| TransportError::BadFrame(e.to_string()))?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(TransportError::BadFrame("datagram exceeds cap".into()));
    }
    Ok(bytes)
}

/// Decode a datagram payload.
pub fn decode_datagram(bytes: &[u8]) -> Result<Frame, TransportError> {
    serde_json::from_slice(bytes).map_err(|e| TransportError::BadFrame(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_round_trip() {
        let frame = Frame::Ping {
            request_id: "r1".into(),
        };
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &frame).await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let back = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(back, frame);
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        assert_eq!(read_frame(&mut cursor).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_length_is_rejected_without_allocation() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(u32::MAX).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buffer);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(TransportError::BadFrame(_))
        ));
    }

    #[test]
    fn datagram_round_trip() {
        let frame = Frame::Pong {
            request_id: "r2".into(),
            ts: 12345,
        };
        let bytes = encode_datagram(&frame).unwrap();
        assert_eq!(decode_datagram(&bytes).unwrap(), frame);
    }

    #[test]
    fn garbage_datagram_is_a_bad_frame() {
        assert!(decode_datagram(b"not json").is_err());
    }
}

//! Fixed-width field I/O for the rendezvous protocol.
//!
//! Message format:
//! ```text
//! ┌────────────────────┬──────────────────────────────────────┐
//! │ Tag (2 bytes)      │ Payload (0, 4 or 20 bytes, per tag)  │
//! │  big-endian u16    │                                      │
//! └────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Nothing here keeps state; short reads surface as `RendezvousError::Io`
//! and the caller decides what that means for the connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::{PeerId, PeerRecord, PEER_ID_LEN, PEER_RECORD_LEN};
use crate::error::{RendezvousError, RendezvousResult};

/// Read the next operation tag.
///
/// Returns `Ok(None)` when the stream ends cleanly on a message boundary.
/// A stream ending between the two tag bytes is an error.
pub async fn read_operation<R>(reader: &mut R) -> RendezvousResult<Option<u16>>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 2];
    if reader.read(&mut tag[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut tag[1..]).await?;
    Ok(Some(u16::from_be_bytes(tag)))
}

/// Read a 20-byte peer record.
pub async fn read_peer_record<R>(reader: &mut R) -> RendezvousResult<PeerRecord>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; PEER_RECORD_LEN];
    reader.read_exact(&mut buf).await?;
    Ok(PeerRecord::from_bytes(&buf))
}

/// Read a 4-byte peer identifier.
pub async fn read_peer_id<R>(reader: &mut R) -> RendezvousResult<PeerId>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; PEER_ID_LEN];
    reader.read_exact(&mut buf).await?;
    Ok(PeerId::from_be_bytes(buf))
}

/// Write one encoded message and flush it.
///
/// Each message goes out in a single `write_all` so a record normally
/// arrives at the peer in one segment.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> RendezvousResult<()>
where
    W: AsyncWrite + Unpin,
{
    if frame.is_empty() {
        return Err(RendezvousError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty frame",
        )));
    }
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::{Request, Response};
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_operation_clean_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert_eq!(read_operation(&mut cursor).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_operation_truncated_tag() {
        let mut cursor = Cursor::new(vec![0x00]);
        let err = read_operation(&mut cursor).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_read_request_fields() {
        let record = PeerRecord::from_ip("192.0.2.1".parse().unwrap(), 51820, 1);
        let mut bytes = Request::Enroll(record).encode();
        bytes.extend(Request::GetPeerInfo(PeerId::new(9)).encode());

        let mut cursor = Cursor::new(bytes);
        assert_eq!(read_operation(&mut cursor).await.unwrap(), Some(1));
        assert_eq!(read_peer_record(&mut cursor).await.unwrap(), record);
        assert_eq!(read_operation(&mut cursor).await.unwrap(), Some(2));
        assert_eq!(read_peer_id(&mut cursor).await.unwrap(), PeerId::new(9));
        assert_eq!(read_operation(&mut cursor).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_error() {
        // Tag for enroll, then only 7 of the 20 record bytes
        let mut bytes = vec![0x00, 0x01];
        bytes.extend_from_slice(&[1u8; 7]);
        let mut cursor = Cursor::new(bytes);
        assert_eq!(read_operation(&mut cursor).await.unwrap(), Some(1));
        assert!(read_peer_record(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Response::PeerInfo(None).encode())
            .await
            .unwrap();
        write_frame(&mut buf, &Response::Enrolled(PeerId::new(3)).encode())
            .await
            .unwrap();
        assert_eq!(buf, vec![0x00, 0x00, 0x00, 0x00, 0x03]);

        assert!(write_frame(&mut buf, &[]).await.is_err());
    }
}

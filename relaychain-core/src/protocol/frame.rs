/*
    frame.rs - Length-prefixed frames

    Every field in either direction travels as a 4-byte big-endian length
    followed by that many payload bytes. Lengths are checked against the
    caller's limit before any payload buffer is allocated.
*/

use super::error::ProtocolError;
use super::MAX_FRAME_LEN;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Read one frame of at most `max_len` payload bytes
///
/// Returns `Ok(None)` when the stream ends cleanly before the first prefix
/// byte. Ending anywhere later is `ProtocolError::Truncated`.
pub async fn read_frame<R>(
    reader: &mut R,
    field: &'static str,
    max_len: usize,
) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated { field });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge {
            field,
            len,
            max: max_len,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated { field }
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(Some(payload))
}

/// Read a frame that must be present and non-empty
pub async fn read_field<R>(
    reader: &mut R,
    field: &'static str,
    max_len: usize,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, field, max_len).await? {
        None => Err(ProtocolError::Truncated { field }),
        Some(payload) if payload.is_empty() => Err(ProtocolError::EmptyField(field)),
        Some(payload) => Ok(payload),
    }
}

/// Write one frame, prefix and payload in a single write
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            field: "outbound",
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frame_survives_byte_at_a_time_delivery() {
        // A one-byte pipe forces every read to see a single byte
        let (mut tx, mut rx) = duplex(1);
        let writer = tokio::spawn(async move {
            write_frame(&mut tx, b"fragmented payload").await.unwrap();
        });

        let frame = read_frame(&mut rx, "test", 64).await.unwrap();
        assert_eq!(frame.as_deref(), Some(&b"fragmented payload"[..]));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (tx, mut rx) = duplex(64);
        drop(tx);
        assert!(read_frame(&mut rx, "action", 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_prefix_is_truncated() {
        let (mut tx, mut rx) = duplex(64);
        tx.write_all(&[0, 0]).await.unwrap();
        drop(tx);
        assert!(matches!(
            read_frame(&mut rx, "identity", 64).await,
            Err(ProtocolError::Truncated { field: "identity" })
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_payload_is_truncated() {
        let (mut tx, mut rx) = duplex(64);
        tx.write_all(&10u32.to_be_bytes()).await.unwrap();
        tx.write_all(b"abc").await.unwrap();
        drop(tx);
        let err = read_frame(&mut rx, "ciphertext", 64).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_payload() {
        let (mut tx, mut rx) = duplex(64);
        // Only the prefix is sent; the reader must not wait for 4 GiB
        tx.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        match read_frame(&mut rx, "identity", 2048).await {
            Err(ProtocolError::FrameTooLarge { field, len, max }) => {
                assert_eq!(field, "identity");
                assert_eq!(len, u32::MAX as usize);
                assert_eq!(max, 2048);
            }
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frame_at_exact_limit_accepted() {
        let (mut tx, mut rx) = duplex(4096);
        write_frame(&mut tx, &[7u8; 2048]).await.unwrap();
        let frame = read_frame(&mut rx, "ciphertext", 2048).await.unwrap();
        assert_eq!(frame.map(|payload| payload.len()), Some(2048));
    }

    #[tokio::test]
    async fn test_read_field_rejects_empty_and_missing() {
        let (mut tx, mut rx) = duplex(64);
        write_frame(&mut tx, b"").await.unwrap();
        drop(tx);

        assert!(matches!(
            read_field(&mut rx, "receiver", 64).await,
            Err(ProtocolError::EmptyField("receiver"))
        ));
        let err = read_field(&mut rx, "ciphertext", 64).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { field } if field == "ciphertext"));
    }

    #[tokio::test]
    async fn test_consecutive_frames_keep_boundaries() {
        let (mut tx, mut rx) = duplex(256);
        write_frame(&mut tx, b"first").await.unwrap();
        write_frame(&mut tx, b"").await.unwrap();
        write_frame(&mut tx, b"third").await.unwrap();

        let mut frames = Vec::new();
        for field in ["a", "b", "c"] {
            frames.push(read_frame(&mut rx, field, 16).await.unwrap().unwrap());
        }
        assert_eq!(
            frames,
            vec![b"first".to_vec(), Vec::new(), b"third".to_vec()]
        );
    }
}

//! Length-prefixed framing for the helper pipes.
//!
//! Wire format: 4-byte little-endian length prefix followed by the payload.

use std::io;
use std::io::ErrorKind;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

/// Largest payload either side is willing to frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream ended before any byte of the length prefix arrived.
    #[error("stream closed before a frame was received")]
    Closed,
    #[error("truncated frame: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    TooLarge { len: usize },
    #[error("frame i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge { len: payload.len() });
    }

    // Bounded by MAX_FRAME_SIZE above, so the cast cannot truncate.
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, failing unless exactly the declared number of bytes arrives.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    let received = read_full(reader, &mut len_buf).await?;
    if received == 0 {
        return Err(FrameError::Closed);
    }
    if received < LENGTH_PREFIX_SIZE {
        return Err(FrameError::Truncated {
            expected: LENGTH_PREFIX_SIZE,
            received,
        });
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge { len });
    }

    let mut payload = vec![0u8; len];
    let received = read_full(reader, &mut payload).await?;
    if received < len {
        return Err(FrameError::Truncated {
            expected: len,
            received,
        });
    }
    Ok(payload)
}

/// Like `read_exact`, but reports how far it got instead of failing on EOF.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

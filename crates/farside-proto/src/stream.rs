//! Async framed reads and writes.

use bincode::{Decode, Encode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::ProtoError;
use crate::wire::{encode_frame, FrameDecoder};

const READ_CHUNK: usize = 4096;

/// Read one message, pulling more bytes from `reader` as needed.
///
/// Returns `None` when the stream ends cleanly on a frame boundary; an
/// EOF in the middle of a frame is an error.
pub async fn read_message<R, T>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
) -> Result<Option<T>, ProtoError>
where
    R: AsyncRead + Unpin,
    T: Decode<()>,
{
    loop {
        if let Some(msg) = decoder.try_frame()? {
            return Ok(Some(msg));
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return if decoder.is_empty() {
                Ok(None)
            } else {
                Err(ProtoError::TruncatedStream)
            };
        }
        trace!(bytes = n, "read transport bytes");
        decoder.extend(&chunk[..n]);
    }
}

/// Encode and write one message, flushing afterwards.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    T: Encode,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    trace!(bytes = frame.len(), "wrote frame");
    Ok(())
}

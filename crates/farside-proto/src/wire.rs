//! Frame encoding and incremental decoding.

use bincode::{Decode, Encode};

use crate::error::ProtoError;

/// Maximum frame payload size (1 MiB). Prevents allocation bombs from a
/// misbehaving peer.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Encode a message into a length-prefixed frame.
pub fn encode_frame<T: Encode>(msg: &T) -> Result<Vec<u8>, ProtoError> {
    let config = bincode::config::standard();
    let payload = bincode::encode_to_vec(msg, config)
        .map_err(|e| ProtoError::Serialization(e.to_string()))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| ProtoError::Serialization("message too large".to_string()))?;
    if len > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(LEN_PREFIX + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Accumulates stream bytes and yields complete frames.
///
/// Reads from a pipe land at arbitrary boundaries; feed every chunk in
/// with [`extend`](Self::extend) and poll [`try_frame`](Self::try_frame)
/// until it returns `None`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Whether the buffer holds no partial frame.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Try to decode one complete frame from the buffer.
    ///
    /// `Ok(None)` means more bytes are needed; an oversized length
    /// prefix or an undecodable payload is an error and poisons the
    /// stream.
    pub fn try_frame<T: Decode<()>>(&mut self) -> Result<Option<T>, ProtoError> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&self.buf[..LEN_PREFIX]);
        let len = u32::from_be_bytes(len_bytes);
        if len > MAX_FRAME_SIZE {
            return Err(ProtoError::FrameTooLarge {
                len,
                max: MAX_FRAME_SIZE,
            });
        }

        let total = LEN_PREFIX + len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let config = bincode::config::standard();
        let (msg, used) = bincode::decode_from_slice(&self.buf[LEN_PREFIX..total], config)
            .map_err(|e| ProtoError::Deserialization(e.to_string()))?;
        if used != len as usize {
            return Err(ProtoError::Deserialization(format!(
                "frame of {len} bytes decoded as {used}"
            )));
        }

        self.buf.drain(..total);
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farside_types::{Message, PressRelease, KeyCode, PROTOCOL_VERSION};

    #[test]
    fn encode_then_decode() {
        let msg = Message::Setup {
            version: PROTOCOL_VERSION,
            params: Default::default(),
        };
        let frame = encode_frame(&msg).unwrap();
        let len = u32::from_be_bytes(frame[..4].try_into().unwrap());
        assert_eq!(len as usize, frame.len() - 4);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);
        let decoded: Message = decoder.try_frame().unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(decoder.is_empty());
    }

    #[test]
    fn decodes_across_arbitrary_boundaries() {
        let msg = Message::KeyEvent {
            key: KeyCode(42),
            state: PressRelease::Release,
        };
        let frame = encode_frame(&msg).unwrap();

        let mut decoder = FrameDecoder::new();
        for byte in &frame[..frame.len() - 1] {
            decoder.extend(std::slice::from_ref(byte));
            assert!(decoder.try_frame::<Message>().unwrap().is_none());
        }
        decoder.extend(&frame[frame.len() - 1..]);
        assert_eq!(decoder.try_frame::<Message>().unwrap(), Some(msg));
    }

    #[test]
    fn two_frames_in_one_read() {
        let first = Message::GetClipboard;
        let second = Message::Ready;
        let mut bytes = encode_frame(&first).unwrap();
        bytes.extend(encode_frame(&second).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.try_frame::<Message>().unwrap(), Some(first));
        assert_eq!(decoder.try_frame::<Message>().unwrap(), Some(second));
        assert_eq!(decoder.try_frame::<Message>().unwrap(), None);
    }

    #[test]
    fn oversized_length_prefix_is_an_error() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        assert!(matches!(
            decoder.try_frame::<Message>(),
            Err(ProtoError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn garbage_payload_is_an_error() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&4u32.to_be_bytes());
        decoder.extend(&[0xff, 0xff, 0xff, 0xff]);
        assert!(decoder.try_frame::<Message>().is_err());
    }
}

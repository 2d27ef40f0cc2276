//! Framing and stream errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("serialisation error: {0}")]
    Serialization(String),

    #[error("deserialisation error: {0}")]
    Deserialization(String),

    #[error("frame size {len} exceeds maximum {max}")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("stream closed mid-frame")]
    TruncatedStream,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

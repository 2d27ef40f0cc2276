//! Wire framing for farside.
//!
//! Each message on the byte stream is `[4 bytes big-endian length]`
//! followed by a bincode payload. The transport underneath is an ssh
//! subprocess's stdio, so decoding has to cope with arbitrary read
//! boundaries: [`FrameDecoder`] accumulates bytes until a full frame is
//! available.

pub mod error;
pub mod stream;
pub mod wire;

pub use error::ProtoError;
pub use stream::{read_message, write_message};
pub use wire::{encode_frame, FrameDecoder, MAX_FRAME_SIZE};

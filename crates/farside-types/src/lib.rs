//! Shared types for farside.
//!
//! Everything that crosses a crate boundary lives here: directions and
//! edge masks, input event primitives, node handles, and the wire
//! protocol messages exchanged between a master and its remotes.

pub mod direction;
pub mod input;
pub mod message;
pub mod node;

pub use direction::{Direction, EdgeMask};
pub use input::{KeyCode, MouseButton, Point, PressRelease};
pub use message::{Message, PROTOCOL_VERSION};
pub use node::{Node, RemoteId};

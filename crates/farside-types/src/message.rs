//! Wire protocol messages.
//!
//! Messages travel as length-prefixed bincode frames over the shell
//! transport's byte stream (see `farside-proto`).

use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::direction::EdgeMask;
use crate::input::{KeyCode, MouseButton, PressRelease};

/// Current protocol version, checked during the Setup/Ready handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Every message either end may put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum Message {
    /// First message from the master: version plus the remote's
    /// configured parameter map.
    Setup {
        version: u32,
        params: BTreeMap<String, String>,
    },

    /// Subordinate's answer to Setup once its driver is up.
    Ready,

    /// Key press or release to replay.
    KeyEvent { key: KeyCode, state: PressRelease },

    /// Relative pointer motion to replay.
    MoveRel { dx: i32, dy: i32 },

    /// Mouse button press or release to replay.
    ClickEvent {
        button: MouseButton,
        state: PressRelease,
    },

    /// Place the pointer at a screen-relative position (0.0..=1.0 on
    /// each axis).
    SetMousePosScreenRel { x: f32, y: f32 },

    /// Ask the peer to read its clipboard and answer with SetClipboard.
    GetClipboard,

    /// Clipboard contents, either as an answer to GetClipboard or
    /// pushed on focus change.
    SetClipboard { text: String },

    /// Set display brightness (gamma scale, 0.0..=1.0).
    SetBrightness { level: f32 },

    /// The sender's cursor entered or left screen-edge bands.
    EdgeMaskChange {
        old: EdgeMask,
        new: EdgeMask,
        x: f32,
        y: f32,
    },

    /// Subordinate-side log line surfaced on the master's stderr.
    LogMsg { text: String },
}

impl Message {
    /// Short name for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "SETUP",
            Self::Ready => "READY",
            Self::KeyEvent { .. } => "KEYEVENT",
            Self::MoveRel { .. } => "MOVEREL",
            Self::ClickEvent { .. } => "CLICKEVENT",
            Self::SetMousePosScreenRel { .. } => "SETMOUSEPOSSCREENREL",
            Self::GetClipboard => "GETCLIPBOARD",
            Self::SetClipboard { .. } => "SETCLIPBOARD",
            Self::SetBrightness { .. } => "SETBRIGHTNESS",
            Self::EdgeMaskChange { .. } => "EDGEMASKCHANGE",
            Self::LogMsg { .. } => "LOGMSG",
        }
    }
}

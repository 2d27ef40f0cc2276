//! Driver errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("driver initialisation failed: {0}")]
    Init(String),

    #[error("failed to bind hotkey '{combo}': {reason}")]
    HotkeyBind { combo: String, reason: String },

    #[error("no display-server backend in this build")]
    NoBackend,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

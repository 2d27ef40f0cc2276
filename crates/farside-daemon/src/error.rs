//! Daemon errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("platform error: {0}")]
    Platform(#[from] farside_platform::PlatformError),

    #[error("protocol error: {0}")]
    Proto(#[from] farside_proto::ProtoError),

    #[error("failed to spawn transport '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

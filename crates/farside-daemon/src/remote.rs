//! Per-remote connection records and the reconnect backoff policy.

use std::collections::BTreeMap;

use farside_types::{Message, Node};

use crate::edge::EdgeState;
use crate::link::{RemoteLink, SshSettings};
use crate::scheduler::Scheduler;

/// Failures beyond this move a remote to [`ConnState::PermFailed`].
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Backoff is counted in half-second units, capped at 30 s.
const RECONNECT_UNIT_US: u64 = 500_000;
const MAX_RECONNECT_UNITS: u64 = 60;

/// Connection state of a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Transport spawned, Setup sent, waiting for Ready.
    SettingUp,
    /// Handshake complete; the remote can receive input.
    Connected,
    /// Torn down after a failure; reconnects when its deadline passes.
    Failed,
    /// Too many failures; only an explicit reconnect action revives it.
    PermFailed,
}

impl ConnState {
    /// Whether the remote is eligible to send or receive messages.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::SettingUp | Self::Connected)
    }
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SettingUp => "setting-up",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::PermFailed => "permanently-failed",
        })
    }
}

/// One addressable peer. Created at startup, destroyed at shutdown;
/// its transport link is reborn across failure cycles.
#[derive(Debug)]
pub struct Remote {
    pub alias: String,
    pub hostname: String,
    /// Key-value parameters sent with Setup.
    pub params: BTreeMap<String, String>,
    /// Transport settings, already overlaid on the global defaults.
    pub ssh: SshSettings,
    /// Neighbor slot per direction, indexed by `Direction::index`.
    pub neighbors: [Option<Node>; 4],
    pub state: ConnState,
    pub failcount: u32,
    pub next_reconnect_time: u64,
    /// Bumped on every setup so events from a torn-down link are
    /// recognisably stale.
    pub generation: u64,
    pub link: Option<RemoteLink>,
    /// Future-dated outbound messages, ordered by send time.
    pub scheduled: Scheduler<Message>,
    pub edges: EdgeState,
}

impl Remote {
    #[must_use]
    pub fn new(
        alias: String,
        hostname: String,
        params: BTreeMap<String, String>,
        ssh: SshSettings,
        neighbors: [Option<Node>; 4],
    ) -> Self {
        Self {
            alias,
            hostname,
            params,
            ssh,
            neighbors,
            state: ConnState::SettingUp,
            failcount: 0,
            next_reconnect_time: 0,
            generation: 0,
            link: None,
            scheduled: Scheduler::new(),
            edges: EdgeState::default(),
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }
}

/// Delay before the nth reconnect attempt: 0.5 s, 1 s, 2 s, 4 s...
/// capped at 30 s.
#[must_use]
pub fn reconnect_delay_us(failcount: u32) -> u64 {
    let shift = failcount.saturating_sub(1).min(63);
    let units = (1u64 << shift).min(MAX_RECONNECT_UNITS);
    units * RECONNECT_UNIT_US
}

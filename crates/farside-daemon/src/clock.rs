//! Monotonic microsecond time.

use std::time::Duration;

use tokio::time::Instant;

/// Monotonic clock anchored at master startup.
///
/// Built on `tokio::time::Instant` so paused-time tests drive it
/// deterministically. Never wall-clock.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Microseconds since startup.
    #[must_use]
    pub fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// The instant corresponding to a microsecond timestamp.
    #[must_use]
    pub fn instant_at(&self, us: u64) -> Instant {
        self.origin + Duration::from_micros(us)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

//! Time sources used by the limiters.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// A source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + Debug {
    /// Monotonic reading used for elapsed-time arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock time since the Unix epoch, used to align window boundaries.
    fn since_epoch(&self) -> Duration;
}

/// The process clock.
///
/// Monotonic readings come from Tokio, so a paused test runtime drives them too.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn since_epoch(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    start_epoch: Duration,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self::starting_at(SystemClock.since_epoch())
    }

    /// Create a clock whose wall-clock reading starts at `since_epoch`.
    pub fn starting_at(since_epoch: Duration) -> Self {
        Self {
            start: Instant::now(),
            start_epoch: since_epoch,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move both readings forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }

    fn since_epoch(&self) -> Duration {
        self.start_epoch + *self.offset.lock()
    }
}

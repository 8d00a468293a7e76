//! Fixed window limiter with clock-aligned, global window resets.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::store::StateStore;
use super::task::{run_every, BackgroundTask};
use super::Limiter;
use crate::error::{RatekeeperError, Result};

/// Parameters for a [`FixedWindowLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowConfig {
    /// Length of each window
    pub window: Duration,
    /// Requests admitted per identifier per window
    pub threshold: u32,
}

impl FixedWindowConfig {
    /// Create a configuration admitting `threshold` requests per `window`.
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self { window, threshold }
    }
}

/// Counts requests per identifier and forgets every count at each window boundary.
///
/// Boundaries are aligned to the wall clock (multiples of `window` since the
/// Unix epoch) and all identifiers roll over together. A client straddling a
/// boundary can therefore get up to twice the threshold through in quick
/// succession; that is inherent to the policy.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    config: FixedWindowConfig,
    counts: Arc<StateStore<u32>>,
    rollover: BackgroundTask,
}

impl FixedWindowLimiter {
    /// Create a limiter and start its rollover task on the current runtime.
    pub fn new(config: FixedWindowConfig) -> Result<Self> {
        Self::with_shutdown(config, &CancellationToken::new())
    }

    /// Like [`new`](Self::new), stopping the rollover task when `shutdown` is cancelled.
    pub fn with_shutdown(config: FixedWindowConfig, shutdown: &CancellationToken) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock), shutdown)
    }

    /// Create a limiter whose boundaries are aligned to `clock`.
    pub fn with_clock(
        config: FixedWindowConfig,
        clock: Arc<dyn Clock>,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        if config.window.is_zero() {
            return Err(RatekeeperError::Config(
                "fixed window duration must be greater than zero".to_string(),
            ));
        }

        let counts = Arc::new(StateStore::new());
        let first_boundary = until_next_boundary(clock.since_epoch(), config.window);
        let start = clock.now() + first_boundary;

        debug!(
            window = ?config.window,
            threshold = config.threshold,
            first_rollover_in = ?first_boundary,
            "Creating fixed window limiter"
        );

        let store = counts.clone();
        let rollover = BackgroundTask::spawn("fixed-window-rollover", shutdown, move |token| {
            run_every(token, start, config.window, move || {
                let cleared = store.clear();
                trace!(cleared = cleared, "Fixed window rolled over");
            })
        })?;

        Ok(Self {
            config,
            counts,
            rollover,
        })
    }

    /// Get the parameters this limiter was created with.
    pub fn config(&self) -> FixedWindowConfig {
        self.config
    }

    /// Requests seen from `identifier` in the current window.
    pub fn count(&self, identifier: &str) -> u32 {
        self.counts.get(identifier).unwrap_or(0)
    }

    /// Number of identifiers seen in the current window.
    pub fn tracked(&self) -> usize {
        self.counts.len()
    }

    /// Stop the rollover task and wait for it. Counts stop resetting afterwards.
    pub async fn shutdown(&self) {
        self.rollover.shutdown().await;
    }

    /// Whether the rollover task is still running.
    pub fn is_running(&self) -> bool {
        !self.rollover.is_finished()
    }
}

impl Limiter for FixedWindowLimiter {
    fn admit(&self, identifier: &str) -> bool {
        let threshold = self.config.threshold;
        let (allowed, seen) = self.counts.with_entry(
            identifier,
            || 0,
            |count| {
                let seen = *count;
                *count = count.saturating_add(1);
                (seen < threshold, seen)
            },
        );

        if !allowed {
            debug!(identifier = %identifier, count = seen, threshold = threshold, "Fixed window limit exceeded");
        }
        allowed
    }
}

/// Time from `since_epoch` until the next multiple of `window`.
///
/// On an exact boundary this is a full window, never zero.
fn until_next_boundary(since_epoch: Duration, window: Duration) -> Duration {
    let window_nanos = window.as_nanos();
    let into_window = since_epoch.as_nanos() % window_nanos;
    let remaining = window_nanos - into_window;
    Duration::new(
        (remaining / 1_000_000_000) as u64,
        (remaining % 1_000_000_000) as u32,
    )
}

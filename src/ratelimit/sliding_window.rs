//! Sliding window limiter based on per-identifier request timestamps.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::store::StateStore;
use super::Limiter;
use crate::error::{RatekeeperError, Result};

/// Parameters for a [`SlidingWindowLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowConfig {
    /// Length of the trailing window
    pub window: Duration,
    /// Requests admitted per identifier within any trailing window
    pub threshold: u32,
}

impl SlidingWindowConfig {
    /// Create a configuration admitting `threshold` requests per trailing `window`.
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self { window, threshold }
    }
}

/// Admits at most `threshold` requests per identifier in any trailing `window`.
///
/// Each admitted request records its timestamp. Timestamps age out one by
/// one as the window moves, and pruning happens lazily on access, so there
/// is no background task.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    config: SlidingWindowConfig,
    clock: Arc<dyn Clock>,
    requests: StateStore<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter reading time from the system clock.
    pub fn new(config: SlidingWindowConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(config: SlidingWindowConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.window.is_zero() {
            return Err(RatekeeperError::Config(
                "sliding window duration must be greater than zero".to_string(),
            ));
        }

        debug!(
            window = ?config.window,
            threshold = config.threshold,
            "Creating sliding window limiter"
        );

        Ok(Self {
            config,
            clock,
            requests: StateStore::new(),
        })
    }

    /// Get the parameters this limiter was created with.
    pub fn config(&self) -> SlidingWindowConfig {
        self.config
    }

    /// Admitted requests from `identifier` still inside the window as of its last access.
    pub fn recorded(&self, identifier: &str) -> usize {
        self.requests.get(identifier).map_or(0, |times| times.len())
    }

    /// Number of identifiers with recorded requests.
    pub fn tracked(&self) -> usize {
        self.requests.len()
    }

    /// Prune every identifier and forget those with nothing left in the window.
    ///
    /// Returns the number of identifiers removed.
    pub fn prune_idle(&self) -> usize {
        let window_start = self.window_start();
        let removed = self.requests.retain(|_, times| {
            prune(times, window_start);
            !times.is_empty()
        });
        trace!(removed = removed, "Pruned idle sliding window entries");
        removed
    }

    fn window_start(&self) -> Option<Instant> {
        self.clock.now().checked_sub(self.config.window)
    }
}

impl Limiter for SlidingWindowLimiter {
    fn admit(&self, identifier: &str) -> bool {
        let threshold = self.config.threshold as usize;

        let (allowed, recent) = self.requests.with_entry(identifier, VecDeque::new, |times| {
            // Read the clock under the lock so timestamps are appended in order.
            let now = self.clock.now();
            prune(times, now.checked_sub(self.config.window));
            if times.len() >= threshold {
                return (false, times.len());
            }
            times.push_back(now);
            (true, times.len())
        });

        if !allowed {
            debug!(identifier = %identifier, recent = recent, threshold = threshold, "Sliding window limit exceeded");
        }
        allowed
    }
}

/// Drop timestamps at or before `window_start`. Timestamps are stored in order.
fn prune(times: &mut VecDeque<Instant>, window_start: Option<Instant>) {
    let Some(window_start) = window_start else {
        return;
    };
    while times.front().is_some_and(|&t| t <= window_start) {
        times.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use std::sync::mpsc;

    fn limiter(window: Duration, threshold: u32) -> (SlidingWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter =
            SlidingWindowLimiter::with_clock(SlidingWindowConfig::new(window, threshold), clock.clone())
                .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_denies_over_threshold() {
        let (limiter, _clock) = limiter(Duration::from_secs(10), 3);

        for _ in 0..3 {
            assert!(limiter.admit("client:1"));
        }
        assert!(!limiter.admit("client:1"));
        // Denied requests are not recorded.
        assert_eq!(limiter.recorded("client:1"), 3);
    }

    #[test]
    fn test_timestamps_age_out_individually() {
        let (limiter, clock) = limiter(Duration::from_secs(10), 3);

        assert!(limiter.admit("client")); // t=0
        clock.advance(Duration::from_secs(4));
        assert!(limiter.admit("client")); // t=4
        clock.advance(Duration::from_secs(4));
        assert!(limiter.admit("client")); // t=8
        assert!(!limiter.admit("client"));

        // t=10: the t=0 request is exactly on the window start and drops out.
        clock.advance(Duration::from_secs(2));
        assert!(limiter.admit("client"));
        assert!(!limiter.admit("client"));

        // t=14: only the t=4 request has aged out.
        clock.advance(Duration::from_secs(4));
        assert!(limiter.admit("client"));
        assert!(!limiter.admit("client"));
        assert_eq!(limiter.recorded("client"), 3);
    }

    #[test]
    fn test_denial_persists_pruned_sequence() {
        let (limiter, clock) = limiter(Duration::from_secs(5), 1);

        assert!(limiter.admit("client"));
        clock.advance(Duration::from_secs(3));
        assert!(!limiter.admit("client"));
        assert_eq!(limiter.recorded("client"), 1);

        clock.advance(Duration::from_secs(2));
        assert!(limiter.admit("client"));
        assert_eq!(limiter.recorded("client"), 1);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (limiter, _clock) = limiter(Duration::from_secs(10), 1);

        assert!(limiter.admit("10.0.0.1"));
        assert!(!limiter.admit("10.0.0.1"));
        assert!(limiter.admit("10.0.0.2"));
    }

    #[test]
    fn test_prune_idle() {
        let (limiter, clock) = limiter(Duration::from_secs(10), 5);

        limiter.admit("old");
        clock.advance(Duration::from_secs(6));
        limiter.admit("recent");
        clock.advance(Duration::from_secs(6));

        assert_eq!(limiter.tracked(), 2);
        assert_eq!(limiter.prune_idle(), 1);
        assert_eq!(limiter.tracked(), 1);
        assert_eq!(limiter.recorded("recent"), 1);
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let result = SlidingWindowLimiter::new(SlidingWindowConfig::new(Duration::ZERO, 1));
        assert!(matches!(result, Err(RatekeeperError::Config(_))));
    }

    #[test]
    fn test_concurrent_admits_are_exact() {
        let (limiter, _clock) = limiter(Duration::from_secs(60), 40);

        let allowed: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..20).filter(|_| limiter.admit("shared")).count()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 40);
        assert_eq!(limiter.recorded("shared"), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_window() {
        let window = Duration::from_secs(2);
        let limiter = SlidingWindowLimiter::new(SlidingWindowConfig::new(window, 1)).unwrap();

        assert!(limiter.admit("client"));
        assert!(!limiter.admit("client"));

        tokio::time::sleep(window).await;
        assert!(limiter.admit("client"));
    }

    /// Clock that blocks its first reader until released, so a second
    /// caller can try to run in between.
    #[derive(Debug)]
    struct PausingClock {
        start: Instant,
        offset: parking_lot::Mutex<Duration>,
        pause: parking_lot::Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl Clock for PausingClock {
        fn now(&self) -> Instant {
            let reading = self.start + *self.offset.lock();
            let pause = self.pause.lock().take();
            if let Some((entered, release)) = pause {
                entered.send(()).unwrap();
                let _ = release.recv_timeout(Duration::from_secs(5));
            }
            reading
        }

        fn since_epoch(&self) -> Duration {
            *self.offset.lock()
        }
    }

    #[test]
    fn test_clock_read_and_append_are_one_critical_section() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let clock = Arc::new(PausingClock {
            start: Instant::now(),
            offset: parking_lot::Mutex::new(Duration::ZERO),
            pause: parking_lot::Mutex::new(Some((entered_tx, release_rx))),
        });
        let limiter = SlidingWindowLimiter::with_clock(
            SlidingWindowConfig::new(Duration::from_secs(10), 2),
            clock.clone(),
        )
        .unwrap();

        std::thread::scope(|s| {
            // First caller reads t=0 and pauses.
            let first = s.spawn(|| limiter.admit("client"));
            entered_rx.recv().unwrap();

            // Second caller arrives at t=5 while the first is paused.
            *clock.offset.lock() = Duration::from_secs(5);
            let second = s.spawn(|| limiter.admit("client"));
            std::thread::sleep(Duration::from_millis(50));
            release_tx.send(()).unwrap();

            assert!(first.join().unwrap());
            assert!(second.join().unwrap());
        });

        // At t=12 the t=0 request has aged out and only t=5 remains.
        *clock.offset.lock() = Duration::from_secs(12);
        assert!(limiter.admit("client"));
        assert_eq!(limiter.recorded("client"), 2);
        assert!(!limiter.admit("client"));
    }
}

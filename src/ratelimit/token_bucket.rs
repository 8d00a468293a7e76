//! Token bucket limiter with interval-batched refills.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::store::StateStore;
use super::task::{run_every, BackgroundTask};
use super::Limiter;
use crate::error::{RatekeeperError, Result};

/// Parameters for a [`TokenBucketLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Capacity of each identifier's bucket
    pub bucket_size: u32,
    /// Time between refill ticks; each tick restores one token
    pub refresh_interval: Duration,
    /// Forget identifiers whose bucket is full after a refill
    pub evict_full_buckets: bool,
}

impl TokenBucketConfig {
    /// Create a configuration with eviction disabled.
    pub fn new(bucket_size: u32, refresh_interval: Duration) -> Self {
        Self {
            bucket_size,
            refresh_interval,
            evict_full_buckets: false,
        }
    }

    /// Enable or disable eviction of full buckets.
    ///
    /// A full bucket behaves exactly like an identifier that was never seen,
    /// so eviction only bounds memory.
    pub fn with_eviction(mut self, evict_full_buckets: bool) -> Self {
        self.evict_full_buckets = evict_full_buckets;
        self
    }
}

/// Gives each identifier a bucket of tokens, one spent per admitted request.
///
/// A background task adds one token to every tracked bucket per
/// `refresh_interval`, capped at `bucket_size`. All buckets refill in
/// lockstep on the same tick.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: TokenBucketConfig,
    buckets: Arc<StateStore<u32>>,
    refill: BackgroundTask,
}

impl TokenBucketLimiter {
    /// Create a limiter and start its refill task on the current runtime.
    pub fn new(config: TokenBucketConfig) -> Result<Self> {
        Self::with_shutdown(config, &CancellationToken::new())
    }

    /// Like [`new`](Self::new), stopping the refill task when `shutdown` is cancelled.
    pub fn with_shutdown(config: TokenBucketConfig, shutdown: &CancellationToken) -> Result<Self> {
        if config.refresh_interval.is_zero() {
            return Err(RatekeeperError::Config(
                "token bucket refresh interval must be greater than zero".to_string(),
            ));
        }

        debug!(
            bucket_size = config.bucket_size,
            refresh_interval = ?config.refresh_interval,
            evict_full_buckets = config.evict_full_buckets,
            "Creating token bucket limiter"
        );

        let buckets = Arc::new(StateStore::new());
        let start = Instant::now() + config.refresh_interval;

        let store = buckets.clone();
        let refill = BackgroundTask::spawn("token-bucket-refill", shutdown, move |token| {
            run_every(token, start, config.refresh_interval, move || refill_all(&store, &config))
        })?;

        Ok(Self {
            config,
            buckets,
            refill,
        })
    }

    /// Get the parameters this limiter was created with.
    pub fn config(&self) -> TokenBucketConfig {
        self.config
    }

    /// Tokens left for `identifier`, or `None` if it is not tracked.
    pub fn tokens(&self, identifier: &str) -> Option<u32> {
        self.buckets.get(identifier)
    }

    /// Number of tracked identifiers.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }

    /// Stop the refill task and wait for it. Buckets stop refilling afterwards.
    pub async fn shutdown(&self) {
        self.refill.shutdown().await;
    }

    /// Whether the refill task is still running.
    pub fn is_running(&self) -> bool {
        !self.refill.is_finished()
    }
}

impl Limiter for TokenBucketLimiter {
    fn admit(&self, identifier: &str) -> bool {
        let bucket_size = self.config.bucket_size;
        let allowed = self.buckets.with_entry(
            identifier,
            || bucket_size,
            |remaining| {
                if *remaining == 0 {
                    return false;
                }
                *remaining -= 1;
                true
            },
        );

        if !allowed {
            debug!(identifier = %identifier, bucket_size = bucket_size, "Token bucket empty");
        }
        allowed
    }
}

/// Add one token to every bucket that is not already full.
fn refill_all(buckets: &StateStore<u32>, config: &TokenBucketConfig) {
    let cap = config.bucket_size;
    let mut refilled = 0usize;

    buckets.for_each_mut(|_, remaining| {
        if *remaining == cap {
            return;
        }
        let next = *remaining + 1;
        assert!(next <= cap, "refill would push a bucket past its capacity of {}", cap);
        *remaining = next;
        refilled += 1;
    });

    let evicted = if config.evict_full_buckets {
        buckets.retain(|_, remaining| *remaining < cap)
    } else {
        0
    };

    trace!(refilled = refilled, evicted = evicted, "Token buckets refilled");
}

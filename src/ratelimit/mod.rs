//! Rate limiting algorithms and state management.

mod clock;
mod fixed_window;
mod sliding_window;
mod store;
mod task;
mod token_bucket;

use std::sync::Arc;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fixed_window::{FixedWindowConfig, FixedWindowLimiter};
pub use sliding_window::{SlidingWindowConfig, SlidingWindowLimiter};
pub use store::StateStore;
pub use task::BackgroundTask;
pub use token_bucket::{TokenBucketConfig, TokenBucketLimiter};

/// An admission policy.
///
/// Implementations are interchangeable: the HTTP layer only ever sees this
/// trait. `admit` does bounded in-memory work and never blocks on I/O.
pub trait Limiter: Send + Sync {
    /// Decide whether a request from `identifier` may proceed now.
    fn admit(&self, identifier: &str) -> bool;
}

impl<L: Limiter + ?Sized> Limiter for Arc<L> {
    fn admit(&self, identifier: &str) -> bool {
        (**self).admit(identifier)
    }
}

impl<L: Limiter + ?Sized> Limiter for Box<L> {
    fn admit(&self, identifier: &str) -> bool {
        (**self).admit(identifier)
    }
}

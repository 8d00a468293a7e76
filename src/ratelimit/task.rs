//! Owned, cancellable background workers for timer-driven limiters.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{RatekeeperError, Result};

/// A Tokio task owned by exactly one limiter.
///
/// The task is cancelled through its token, which is a child of the token
/// supplied at spawn time. Dropping the handle cancels the task.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    /// Spawn `work` on the current Tokio runtime.
    ///
    /// Fails if called outside a runtime rather than deferring the start.
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, work: F) -> Result<Self>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| {
            RatekeeperError::Runtime(format!("{} must be created inside a Tokio runtime: {}", name, e))
        })?;

        let token = parent.child_token();
        let handle = runtime.spawn(work(token.clone()));
        debug!(task = name, "Background task started");

        Ok(Self {
            name,
            token,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Ask the task to stop. Returns immediately.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task has terminated (or was already joined).
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Cancel the task and wait for it to terminate.
    pub async fn shutdown(&self) {
        self.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(()) => debug!(task = self.name, "Background task stopped"),
                Err(e) if e.is_panic() => error!(task = self.name, error = %e, "Background task panicked"),
                Err(_) => {}
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Call `tick` at `start` and every `period` after it until `token` is cancelled.
///
/// Late ticks are skipped rather than bunched up, so ticks stay on the
/// `start + n * period` grid.
pub(crate) async fn run_every(
    token: CancellationToken,
    start: Instant,
    period: Duration,
    mut tick: impl FnMut() + Send,
) {
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => tick(),
        }
    }
}

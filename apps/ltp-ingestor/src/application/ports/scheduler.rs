//! Scheduler Port
//!
//! Single-shot deferred actions with cancellation. The batch writer arms its
//! flush timer through this port so tests can drive time by hand.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Work to run once the delay elapses.
pub type DeferredAction = BoxFuture<'static, ()>;

/// Handle to a scheduled action.
///
/// Cancelling is idempotent. A cancelled action never runs; an action that
/// already started is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct ScheduledTask {
    cancel: CancellationToken,
}

impl ScheduledTask {
    /// Wrap a cancellation token.
    #[must_use]
    pub const fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Cancel the action if it has not fired yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by the scheduler implementation.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Schedules single-shot deferred actions.
pub trait Scheduler: Send + Sync {
    /// Run `action` after `delay` unless the returned task is cancelled first.
    fn schedule(&self, delay: Duration, action: DeferredAction) -> ScheduledTask;
}

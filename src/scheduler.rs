//! Cancellable one-shot timer for the round restart.
//!
//! The session loop polls [`RestartTimer::wait`] inside `tokio::select!`
//! guarded by [`RestartTimer::is_armed`]. Cancelling simply disarms it, so a
//! reset or disconnect that lands before the deadline can never be followed by
//! a stale `NEW_ROUND`.

use std::time::Duration;

use tokio::time::Instant;

/// One pending deadline, or none.
#[derive(Debug, Clone, Default)]
pub struct RestartTimer {
    deadline: Option<Instant>,
}

impl RestartTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer `delay` from now, replacing any pending deadline.
    pub fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Disarm. Returns `true` if a deadline was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve at the deadline; never resolves while disarmed.
    ///
    /// Does not disarm on its own; the caller calls [`cancel`](Self::cancel)
    /// (or re-arms) once it has acted on the expiry.
    pub async fn wait(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

//! Monotonic time and delays
//!
//! Everything time-related in the engine goes through `tokio::time`, so tests can
//! pause the clock and let the runtime auto-advance it.

use std::time::Duration;

pub use tokio::time::Instant;

/// Default delay between re-broadcasts of an in-flight transaction
pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_millis(500);

/// Current monotonic instant
pub fn now() -> Instant {
    Instant::now()
}

/// Suspend the current task for `delay`
pub async fn sleep(delay: Duration) {
    tokio::time::sleep(delay).await
}

/// A fixed point in time after which work should be abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self { at: now() + timeout }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Completes when the deadline is reached
    pub async fn wait(&self) {
        tokio::time::sleep_until(self.at).await
    }
}

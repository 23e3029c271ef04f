//! Single-owner cancellable debounce timer.
//!
//! Each `reset` replaces the pending deadline instead of stacking another
//! one. The owner awaits [`DebounceTimer::fired`] inside its `select!` loop;
//! an unarmed timer never fires.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

#[derive(Debug, Default)]
pub struct DebounceTimer {
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm (or re-arm) the timer to fire `duration` from now.
    pub fn reset(&mut self, duration: Duration) {
        self.deadline = Some(Instant::now() + duration);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the deadline passes, disarming the timer. Pending
    /// forever while unarmed.
    ///
    /// Cancel-safe: dropping the future leaves the deadline in place.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

//! Real-time pacing of segment fetches and the per-session play budget.
//!
//! A simulated client must not fetch faster than it would play. After each
//! fetch the session sleeps for whatever is left of the segment's nominal
//! duration.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source with an async sleep.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Convert fractional seconds from a manifest into a duration.
///
/// Negative or non-finite values become zero.
pub fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Suspend for `max(target - elapsed, 0)` and return the time slept.
///
/// A zero `target` means fetch without pacing.
pub async fn pace(clock: &dyn Clock, target: Duration, elapsed: Duration) -> Duration {
    let remaining = target.saturating_sub(elapsed);
    if !remaining.is_zero() {
        clock.sleep(remaining).await;
    }
    remaining
}

/// Remaining simulated playback time for one session.
///
/// Only ever decreases; playback stops once it reaches zero or below.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayBudget {
    remaining: f64,
}

impl PlayBudget {
    pub fn new(total: Duration) -> Self {
        Self {
            remaining: total.as_secs_f64(),
        }
    }

    pub fn consume(&mut self, spent: Duration) {
        self.remaining -= spent.as_secs_f64();
    }

    /// Remaining seconds; negative once overspent
    pub fn remaining_secs(&self) -> f64 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0.0
    }
}

/// Virtual clock for tests: sleeping advances time instantly.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ManualClock {
    now: std::sync::Mutex<Duration>,
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

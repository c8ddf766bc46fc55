//! Time source for the polling loops.
//!
//! Readiness probing and status polling both wait on fixed intervals under an
//! overall deadline. They take a [`Clock`] instead of calling
//! `tokio::time::sleep` directly so tests can run those loops against
//! virtual time.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Monotonic clock with an async sleep.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` returns immediately after advancing `now`.
///
/// Real I/O done between sleeps (HTTP probes, runtime calls) does not move
/// virtual time, so a loop bounded by this clock performs exactly
/// `deadline / interval` rounds regardless of host speed.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Move virtual time forward without sleeping.
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|p| p.into_inner());
        *elapsed += by;
    }

    /// Total virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Absolute point in time after which a polling loop gives up.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub(crate) fn after(clock: &dyn Clock, budget: Duration) -> Self {
        Self {
            started: clock.now(),
            budget,
        }
    }

    pub(crate) fn expired(&self, clock: &dyn Clock) -> bool {
        clock.now().saturating_duration_since(self.started) >= self.budget
    }

    pub(crate) fn elapsed(&self, clock: &dyn Clock) -> Duration {
        clock.now().saturating_duration_since(self.started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_sleep_advances_virtual_time() {
        let clock = ManualClock::new();
        let before = clock.now();
        clock.sleep(Duration::from_secs(30)).await;
        assert_eq!(clock.now() - before, Duration::from_secs(30));
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn deadline_expires_on_budget() {
        let clock = ManualClock::new();
        let deadline = Deadline::after(&clock, Duration::from_secs(3));
        assert!(!deadline.expired(&clock));
        clock.sleep(Duration::from_secs(2)).await;
        assert!(!deadline.expired(&clock));
        clock.sleep(Duration::from_secs(1)).await;
        assert!(deadline.expired(&clock));
        assert_eq!(deadline.elapsed(&clock), Duration::from_secs(3));
    }
}

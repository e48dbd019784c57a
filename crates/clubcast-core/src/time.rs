//! Clock abstraction for testable timing.
//!
//! Token-bucket refill, idempotency TTLs, and retry schedules all derive
//! from wall-clock time. Injecting the clock lets tests drive those
//! computations deterministically instead of sleeping.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};

/// Time source for the pipeline.
///
/// Production uses [`SystemClock`]; tests inject [`TestClock`] and advance
/// it explicitly.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the system time and tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Controllable clock for deterministic tests.
///
/// Time only moves when [`TestClock::advance`] is called; `sleep` advances
/// the clock instead of waiting, so time-driven loops run immediately.
#[derive(Debug, Clone)]
pub struct TestClock {
    base_ms: i64,
    offset_ms: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock starting at a fixed epoch.
    pub fn new() -> Self {
        // 2026-01-01T00:00:00Z; any fixed point works.
        Self::starting_at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    }

    /// Creates a test clock starting at the given time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { base_ms: start.timestamp_millis(), offset_ms: Arc::new(AtomicI64::new(0)) }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::AcqRel);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.base_ms + self.offset_ms.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_clock_sleep_advances_instead_of_waiting() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(3600)).await;

        assert_eq!(clock.now() - start, chrono::Duration::seconds(3600));
    }

    #[test]
    fn clones_share_the_same_timeline() {
        let clock = TestClock::new();
        let other = clock.clone();

        clock.advance(Duration::from_secs(5));

        assert_eq!(clock.now(), other.now());
    }
}

//! Clock abstraction so retry schedules can be tested deterministically.
//!
//! Attempt timestamps (`scheduled_at`, `completed_at`, `next_retry_at`) all
//! come from a `Clock`. Production uses `RealClock`; tests drive a
//! `TestClock` forward to make backoff windows elapse instantly.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Clock abstraction for time operations.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current system time for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Current time as a UTC timestamp suitable for persistence.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Production clock backed by the OS and tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock.
///
/// Clones share the same underlying time, so a clock handed to the engine
/// can be advanced from the test body.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    system_start_ns: u64,
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at the current wall time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at `start`.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            system_start_ns: saturating_nanos(since_epoch),
            base_instant: Instant::now(),
        }
    }

    /// Moves time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.elapsed_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
    }

    /// Moves time forward to `target`. Earlier targets are ignored.
    pub fn advance_to(&self, target: DateTime<Utc>) {
        let now = self.now_utc();
        if let Ok(delta) = (target - now).to_std() {
            self.advance(delta);
        }
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        let ns = self.system_start_ns.saturating_add(self.elapsed_ns.load(Ordering::Acquire));
        UNIX_EPOCH + Duration::from_nanos(ns)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_both_clocks() {
        let start = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let clock = TestClock::with_start_time(start);
        let instant = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now().duration_since(instant), Duration::from_secs(90));
        assert_eq!(clock.now_system(), start + Duration::from_secs(90));
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::new();
        let handle = clock.clone();

        handle.advance(Duration::from_secs(5));

        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn advance_to_ignores_past_targets() {
        let clock = TestClock::new();
        let before = clock.now_utc();

        clock.advance_to(before - chrono::Duration::seconds(10));
        assert_eq!(clock.now_utc(), before);

        clock.advance_to(before + chrono::Duration::seconds(10));
        assert_eq!(clock.now_utc(), before + chrono::Duration::seconds(10));
    }

    #[tokio::test]
    async fn sleep_advances_instead_of_waiting() {
        let clock = TestClock::new();

        clock.sleep(Duration::from_secs(3600)).await;

        assert_eq!(clock.elapsed(), Duration::from_secs(3600));
    }
}

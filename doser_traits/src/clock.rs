use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// 2000-01-01T00:00:00Z. Anything earlier means the wall clock was never set.
pub const MIN_VALID_UNIX: u32 = 946_684_800;

/// Monotonic clock abstraction for control and timing across the stack.
///
/// - now(): returns a monotonic Instant
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - ms_since(): helper to compute elapsed milliseconds from an epoch Instant
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        dur.as_millis() as u64
    }
}

/// Default, real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Calendar time source.
///
/// Returns unix seconds, or 0 while the clock is not synchronized yet
/// (no NTP / RTC). Callers treat 0 as "unavailable", not as an error.
pub trait WallClock {
    fn now_unix(&self) -> u32;

    #[inline]
    fn is_synced(&self) -> bool {
        self.now_unix() != 0
    }
}

/// System time, reported as unavailable when it predates `MIN_VALID_UNIX`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_unix(&self) -> u32 {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if secs < u64::from(MIN_VALID_UNIX) {
            return 0;
        }
        u32::try_from(secs).unwrap_or(u32::MAX)
    }
}

/// Deterministic clocks for tests and simulation.
pub mod test_clock {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Deterministic test clock whose time can be advanced manually.
    ///
    /// now() = origin + offset
    /// sleep(d) advances internal time by d without actually sleeping.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        offset: Arc<std::sync::Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Arc::new(std::sync::Mutex::new(Duration::ZERO)),
            }
        }

        /// Advance the clock by the given duration.
        pub fn advance(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = off.saturating_add(d);
            }
        }

        /// Set the absolute offset relative to origin (useful for tests).
        pub fn set_offset(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = d;
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
            self.origin + off
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }

    /// Settable unix time. Starts unsynchronized (0).
    #[derive(Debug, Clone, Default)]
    pub struct TestWallClock {
        secs: Arc<AtomicU32>,
    }

    impl TestWallClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(secs: u32) -> Self {
            let c = Self::default();
            c.set(secs);
            c
        }

        pub fn set(&self, secs: u32) {
            self.secs.store(secs, Ordering::Relaxed);
        }

        pub fn advance_secs(&self, secs: u32) {
            let _ = self
                .secs
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
                    Some(s.saturating_add(secs))
                });
        }
    }

    impl WallClock for TestWallClock {
        fn now_unix(&self) -> u32 {
            self.secs.load(Ordering::Relaxed)
        }
    }
}

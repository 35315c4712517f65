//! Test and helper mocks for doser_core

use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use doser_traits::clock::Clock;
use doser_traits::clock::test_clock::TestClock;

/// Test clock whose `sleep` parks until the test calls `release`.
///
/// Lets a test observe a dispense while the motor is running: wait for
/// `wait_entered`, inspect state from another thread, then `release`.
/// Time advances by the requested duration once released.
#[derive(Debug, Clone)]
pub struct GateClock {
    inner: TestClock,
    entered_tx: xch::Sender<Duration>,
    entered_rx: xch::Receiver<Duration>,
    release_tx: xch::Sender<()>,
    release_rx: xch::Receiver<()>,
}

impl Default for GateClock {
    fn default() -> Self {
        Self::new()
    }
}

impl GateClock {
    pub fn new() -> Self {
        let (entered_tx, entered_rx) = xch::unbounded();
        let (release_tx, release_rx) = xch::unbounded();
        Self {
            inner: TestClock::new(),
            entered_tx,
            entered_rx,
            release_tx,
            release_rx,
        }
    }

    /// Wait until some thread blocks in `sleep`; returns the requested duration.
    pub fn wait_entered(&self, timeout: Duration) -> Option<Duration> {
        self.entered_rx.recv_timeout(timeout).ok()
    }

    /// Let one parked `sleep` return.
    pub fn release(&self) {
        let _ = self.release_tx.send(());
    }
}

impl Clock for GateClock {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn sleep(&self, d: Duration) {
        let _ = self.entered_tx.send(d);
        let _ = self.release_rx.recv();
        self.inner.advance(d);
    }
}

//! Motor driver backends for the dosing heads.
//!
//! - `SimulatedMotorDriver`: in-process 4-channel driver used by default and in tests.
//! - `tb6612::Tb6612Driver` (feature `hardware`, Linux): two TB6612 dual H-bridges
//!   on Raspberry Pi GPIO sharing one standby pin.
pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod tb6612;

use doser_traits::{Direction, MotorDriver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::HwError;

/// Number of H-bridge channels on the board (one per dosing head).
pub const NUM_CHANNELS: usize = 4;

/// Bookkeeping for one channel, shared by all driver backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelState {
    pub running: bool,
    pub direction: Option<Direction>,
    pub started_at: Option<Instant>,
    /// Duration of the last completed run.
    pub last_run_ms: u32,
    pub starts: u32,
    pub stops: u32,
}

impl ChannelState {
    pub fn mark_started(&mut self, direction: Direction) {
        self.running = true;
        self.direction = Some(direction);
        self.started_at = Some(Instant::now());
        self.starts = self.starts.saturating_add(1);
    }

    pub fn mark_stopped(&mut self) {
        if self.running {
            self.last_run_ms = self.elapsed_ms();
        }
        self.running = false;
        self.direction = None;
        self.started_at = None;
        self.stops = self.stops.saturating_add(1);
    }

    fn elapsed_ms(&self) -> u32 {
        self.started_at
            .map(|t| u32::try_from(t.elapsed().as_millis()).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    /// Current run length while running, otherwise the last run length.
    pub fn runtime_ms(&self) -> u32 {
        if self.running {
            self.elapsed_ms()
        } else {
            self.last_run_ms
        }
    }
}

#[inline]
pub(crate) fn check_channel(channel: u8) -> Result<usize, HwError> {
    let idx = usize::from(channel);
    if idx < NUM_CHANNELS {
        Ok(idx)
    } else {
        Err(HwError::InvalidChannel(channel))
    }
}

/// Simulated motor driver.
///
/// Tracks per-channel state exactly like the hardware driver, without GPIO.
/// Start failures can be injected per channel to exercise error paths.
#[derive(Debug, Default)]
pub struct SimulatedMotorDriver {
    channels: Mutex<[ChannelState; NUM_CHANNELS]>,
    fail_start: [AtomicBool; NUM_CHANNELS],
    emergency_stops: Mutex<u32>,
}

impl SimulatedMotorDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, [ChannelState; NUM_CHANNELS]> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `start` calls on `channel` fail until cleared.
    pub fn set_fail_start(&self, channel: u8, fail: bool) {
        if let Some(flag) = self.fail_start.get(usize::from(channel)) {
            flag.store(fail, Ordering::Relaxed);
        }
    }

    /// Snapshot of a channel's bookkeeping.
    pub fn channel(&self, channel: u8) -> Option<ChannelState> {
        self.lock().get(usize::from(channel)).copied()
    }

    pub fn start_count(&self, channel: u8) -> u32 {
        self.channel(channel).map(|c| c.starts).unwrap_or(0)
    }

    pub fn stop_count(&self, channel: u8) -> u32 {
        self.channel(channel).map(|c| c.stops).unwrap_or(0)
    }

    pub fn emergency_stop_count(&self) -> u32 {
        *self
            .emergency_stops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl MotorDriver for SimulatedMotorDriver {
    fn start(
        &self,
        channel: u8,
        direction: Direction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let idx = check_channel(channel)?;
        if self.fail_start[idx].load(Ordering::Relaxed) {
            return Err(Box::new(HwError::InjectedFault(channel)));
        }
        self.lock()[idx].mark_started(direction);
        tracing::debug!(channel, ?direction, "motor start (simulated)");
        Ok(())
    }

    fn stop(&self, channel: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let idx = check_channel(channel)?;
        let mut chans = self.lock();
        chans[idx].mark_stopped();
        tracing::debug!(channel, run_ms = chans[idx].last_run_ms, "motor stop (simulated)");
        Ok(())
    }

    fn brake(&self, channel: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let idx = check_channel(channel)?;
        self.lock()[idx].mark_stopped();
        tracing::debug!(channel, "motor brake (simulated)");
        Ok(())
    }

    fn is_running(&self, channel: u8) -> bool {
        self.channel(channel).map(|c| c.running).unwrap_or(false)
    }

    fn runtime_ms(&self, channel: u8) -> u32 {
        self.channel(channel).map(|c| c.runtime_ms()).unwrap_or(0)
    }

    fn emergency_stop_all(&self) {
        for c in self.lock().iter_mut() {
            c.mark_stopped();
        }
        *self
            .emergency_stops
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        tracing::warn!("emergency stop: all channels braked (simulated)");
    }

    fn channel_count(&self) -> u8 {
        NUM_CHANNELS as u8
    }
}

//! One peristaltic dosing head: volume to runtime conversion, blocking
//! dispense, calibration.
//!
//! A head runs at most one motor operation at a time. Concurrent requests
//! fail fast with `DoserError::HeadBusy`; calibration waits for a running
//! dispense to finish so the rate never changes mid-dose.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::time::Duration;

use doser_traits::clock::{Clock, WallClock};
use doser_traits::{Direction, MotorDriver};
use serde::Serialize;

use crate::calibration::{CalibrationRecord, CalibrationStore};
use crate::error::{DoserError, Result};
use crate::hw_error::map_hw_error;

pub const MIN_VOLUME_ML: f32 = 0.1;
pub const MAX_VOLUME_ML: f32 = 1000.0;
pub const MIN_RUNTIME_MS: u32 = 100;
pub const MAX_RUNTIME_MS: u32 = 300_000;

/// Outcome of one dispense request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DosingResult {
    pub success: bool,
    pub actual_runtime_ms: u32,
    pub target_volume_ml: f32,
    pub estimated_volume_ml: f32,
    /// Empty on success.
    pub error_message: String,
}

impl DosingResult {
    pub fn failed(target_volume_ml: f32, error: impl Into<String>) -> Self {
        Self {
            success: false,
            actual_runtime_ms: 0,
            target_volume_ml,
            estimated_volume_ml: 0.0,
            error_message: error.into(),
        }
    }
}

pub fn validate_volume(volume_ml: f32) -> Result<(), DoserError> {
    if volume_ml.is_finite() && (MIN_VOLUME_ML..=MAX_VOLUME_ML).contains(&volume_ml) {
        Ok(())
    } else {
        Err(DoserError::Validation(format!(
            "invalid volume: {volume_ml} mL (range: {MIN_VOLUME_ML}-{MAX_VOLUME_ML} mL)"
        )))
    }
}

pub fn validate_runtime(runtime_ms: u32) -> Result<(), DoserError> {
    if (MIN_RUNTIME_MS..=MAX_RUNTIME_MS).contains(&runtime_ms) {
        Ok(())
    } else {
        Err(DoserError::Validation(format!(
            "invalid runtime: {runtime_ms} ms (range: {MIN_RUNTIME_MS}-{MAX_RUNTIME_MS} ms)"
        )))
    }
}

/// Stops the channel when dropped, so the motor is released on every exit path.
struct RunGuard<'a> {
    motor: &'a dyn MotorDriver,
    channel: u8,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.motor.stop(self.channel) {
            tracing::error!(head = self.channel, error = %e, "failed to stop motor");
        }
    }
}

pub struct DosingHead {
    index: u8,
    motor: Arc<dyn MotorDriver>,
    store: CalibrationStore,
    calibration: RwLock<CalibrationRecord>,
    run_lock: Mutex<()>,
    clock: Arc<dyn Clock + Send + Sync>,
    wall: Arc<dyn WallClock + Send + Sync>,
}

impl std::fmt::Debug for DosingHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DosingHead")
            .field("index", &self.index)
            .field("calibration", &self.calibration())
            .finish_non_exhaustive()
    }
}

impl DosingHead {
    /// Bind a head to its motor channel and load its calibration.
    ///
    /// A missing or unreadable record leaves the head on the default rate.
    pub fn open(
        index: u8,
        motor: Arc<dyn MotorDriver>,
        store: CalibrationStore,
        clock: Arc<dyn Clock + Send + Sync>,
        wall: Arc<dyn WallClock + Send + Sync>,
    ) -> Result<Self> {
        if index >= motor.channel_count() {
            return Err(DoserError::InvalidHead(index).into());
        }
        let calibration = match store.load(index) {
            Ok(Some(rec)) if rec.is_usable() => {
                tracing::info!(head = index, ml_per_s = rec.ml_per_second, "loaded calibration");
                rec
            }
            Ok(Some(rec)) => {
                tracing::warn!(head = index, ml_per_s = rec.ml_per_second, "stored calibration unusable; using default rate");
                CalibrationRecord::default()
            }
            Ok(None) => {
                tracing::info!(head = index, "no stored calibration; using default rate");
                CalibrationRecord::default()
            }
            Err(e) => {
                tracing::warn!(head = index, error = %e, "failed to load calibration; using default rate");
                CalibrationRecord::default()
            }
        };
        Ok(Self {
            index,
            motor,
            store,
            calibration: RwLock::new(calibration),
            run_lock: Mutex::new(()),
            clock,
            wall,
        })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Snapshot of the active calibration.
    pub fn calibration(&self) -> CalibrationRecord {
        *self
            .calibration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration().is_calibrated
    }

    pub fn runtime_for(&self, volume_ml: f32) -> Option<u32> {
        self.calibration().runtime_ms_for(volume_ml)
    }

    pub fn estimate_volume(&self, runtime_ms: u32) -> f32 {
        self.calibration().estimate_volume(runtime_ms)
    }

    pub fn is_dispensing(&self) -> bool {
        self.motor.is_running(self.index)
    }

    /// Stop the motor out of band. The dispensing call still returns normally.
    pub fn stop_dispensing(&self) -> Result<()> {
        self.motor
            .stop(self.index)
            .map_err(|e| map_hw_error(&*e))?;
        Ok(())
    }

    fn try_claim(&self) -> Result<MutexGuard<'_, ()>, DoserError> {
        match self.run_lock.try_lock() {
            Ok(g) => Ok(g),
            Err(TryLockError::Poisoned(p)) => Ok(p.into_inner()),
            Err(TryLockError::WouldBlock) => Err(DoserError::HeadBusy(self.index)),
        }
    }

    fn claim_blocking(&self) -> MutexGuard<'_, ()> {
        self.run_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the motor forward for `runtime_ms` and return the measured run time.
    /// Caller holds the run lock.
    fn run_motor(&self, runtime_ms: u32) -> Result<u32> {
        self.motor
            .start(self.index, Direction::Forward)
            .map_err(|e| map_hw_error(&*e))?;
        let guard = RunGuard {
            motor: &*self.motor,
            channel: self.index,
        };
        let t0 = self.clock.now();
        self.clock.sleep(Duration::from_millis(u64::from(runtime_ms)));
        drop(guard);
        Ok(u32::try_from(self.clock.ms_since(t0)).unwrap_or(u32::MAX))
    }

    /// Dispense `volume_ml`, blocking for the whole run.
    pub fn try_dispense(&self, volume_ml: f32) -> Result<DosingResult> {
        validate_volume(volume_ml)?;
        let _run = self.try_claim()?;
        let cal = self.calibration();
        let runtime_ms = cal.runtime_ms_for(volume_ml).ok_or_else(|| {
            DoserError::Validation(format!(
                "cannot compute runtime for {volume_ml} mL at {} mL/s",
                cal.ml_per_second
            ))
        })?;
        validate_runtime(runtime_ms)?;

        tracing::info!(head = self.index, volume_ml, runtime_ms, "dispensing");
        let actual_ms = self.run_motor(runtime_ms)?;
        let estimated = cal.estimate_volume(actual_ms);
        tracing::info!(
            head = self.index,
            actual_ms,
            estimated_ml = estimated,
            "dispense complete"
        );
        Ok(DosingResult {
            success: true,
            actual_runtime_ms: actual_ms,
            target_volume_ml: volume_ml,
            estimated_volume_ml: estimated,
            error_message: String::new(),
        })
    }

    /// Like `try_dispense`, reporting failures inside the result.
    pub fn dispense(&self, volume_ml: f32) -> DosingResult {
        match self.try_dispense(volume_ml) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(head = self.index, volume_ml, error = %e, "dispense failed");
                DosingResult::failed(volume_ml, e.to_string())
            }
        }
    }

    /// Run the motor for a fixed time, ignoring calibration. Returns the measured run time.
    pub fn run_for_duration(&self, runtime_ms: u32) -> Result<u32> {
        validate_runtime(runtime_ms)?;
        let _run = self.try_claim()?;
        tracing::info!(head = self.index, runtime_ms, "timed run");
        self.run_motor(runtime_ms)
    }

    /// Correct the flow rate from a calibration run that delivered `actual_ml`.
    ///
    /// The new record is persisted before it becomes active; on a write
    /// failure the previous calibration stays in effect.
    pub fn calibrate(&self, actual_ml: f32) -> Result<CalibrationRecord> {
        let _run = self.claim_blocking();
        let current = self.calibration();
        let next = current.recalibrated(actual_ml, self.wall.now_unix())?;
        self.store.save(self.index, &next)?;
        *self
            .calibration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
        tracing::info!(
            head = self.index,
            old_ml_per_s = current.ml_per_second,
            new_ml_per_s = next.ml_per_second,
            "calibrated"
        );
        Ok(next)
    }

    /// Restore and persist the default rate.
    pub fn reset_calibration(&self) -> Result<()> {
        let _run = self.claim_blocking();
        let next = CalibrationRecord::default();
        self.store.save(self.index, &next)?;
        *self
            .calibration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
        tracing::info!(head = self.index, "calibration reset to default");
        Ok(())
    }
}

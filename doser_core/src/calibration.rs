//! Per-head flow-rate calibration and its persistence.
use std::sync::Arc;

use doser_traits::Storage;
use serde::{Deserialize, Serialize};

use crate::error::{DoserError, Result};
use crate::storage::{decode, encode};

/// Flow rate assumed until a head is calibrated.
pub const DEFAULT_ML_PER_SECOND: f32 = 1.0;
/// Volume the head is told to dispense during a calibration run.
pub const CALIBRATION_VOLUME_ML: f32 = 4.0;
/// Upper bound for a plausible calibrated flow rate.
pub const MAX_ML_PER_SECOND: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub ml_per_second: f32,
    pub is_calibrated: bool,
    /// Unix seconds, 0 when unknown.
    #[serde(default)]
    pub last_calibration_time: u32,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            ml_per_second: DEFAULT_ML_PER_SECOND,
            is_calibrated: false,
            last_calibration_time: 0,
        }
    }
}

impl CalibrationRecord {
    /// Whether the rate can be used to compute runtimes.
    pub fn is_usable(&self) -> bool {
        self.ml_per_second.is_finite()
            && self.ml_per_second > 0.0
            && self.ml_per_second <= MAX_ML_PER_SECOND
    }

    /// Motor runtime for `volume_ml` at this rate, rounded to the nearest millisecond.
    /// `None` if the result does not fit in a `u32`.
    pub fn runtime_ms_for(&self, volume_ml: f32) -> Option<u32> {
        let ms = (f64::from(volume_ml) / f64::from(self.ml_per_second) * 1000.0).round();
        if ms.is_finite() && (0.0..=f64::from(u32::MAX)).contains(&ms) {
            Some(ms as u32)
        } else {
            None
        }
    }

    /// Volume delivered by running for `runtime_ms` at this rate.
    pub fn estimate_volume(&self, runtime_ms: u32) -> f32 {
        self.ml_per_second * (runtime_ms as f32 / 1000.0)
    }

    /// New record after a calibration run that was commanded to deliver
    /// `CALIBRATION_VOLUME_ML` but actually delivered `actual_ml`.
    ///
    /// The run lasted as long as the current rate says 4 mL takes, so the
    /// corrected rate is `actual_ml / duration`.
    pub fn recalibrated(&self, actual_ml: f32, now_unix: u32) -> Result<Self, DoserError> {
        if !(actual_ml.is_finite() && actual_ml > 0.0) {
            return Err(DoserError::Validation(format!(
                "measured calibration volume must be > 0 mL, got {actual_ml}"
            )));
        }
        let duration_ms = self
            .runtime_ms_for(CALIBRATION_VOLUME_ML)
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                DoserError::State(format!(
                    "current rate {} mL/s yields no usable calibration duration",
                    self.ml_per_second
                ))
            })?;
        let rate = actual_ml / (duration_ms as f32 / 1000.0);
        if !(rate > 0.0 && rate <= MAX_ML_PER_SECOND) {
            return Err(DoserError::Validation(format!(
                "calibrated rate {rate:.3} mL/s outside (0, {MAX_ML_PER_SECOND}]"
            )));
        }
        Ok(Self {
            ml_per_second: rate,
            is_calibrated: true,
            last_calibration_time: now_unix,
        })
    }
}

/// Calibration records keyed by head, namespace `calibration`.
#[derive(Clone)]
pub struct CalibrationStore {
    storage: Arc<dyn Storage>,
}

impl CalibrationStore {
    pub const NAMESPACE: &'static str = "calibration";

    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(head: u8) -> String {
        format!("head{head}")
    }

    /// `Ok(None)` if the head was never calibrated.
    pub fn load(&self, head: u8) -> Result<Option<CalibrationRecord>> {
        let bytes = self
            .storage
            .get(Self::NAMESPACE, &Self::key(head))
            .map_err(|e| DoserError::persistence("read calibration", e))?;
        match bytes {
            Some(b) => Ok(Some(decode("decode calibration", &b)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, head: u8, record: &CalibrationRecord) -> Result<()> {
        let bytes = encode("encode calibration", record)?;
        self.storage
            .put(Self::NAMESPACE, &Self::key(head), &bytes)
            .map_err(|e| DoserError::persistence("write calibration", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_runtime() {
        let r = CalibrationRecord::default();
        assert_eq!(r.runtime_ms_for(2.0), Some(2000));
        assert_eq!(r.runtime_ms_for(0.1), Some(100));
    }

    #[test]
    fn recalibration_from_default() {
        let r = CalibrationRecord::default()
            .recalibrated(3.8, 1_700_000_000)
            .unwrap();
        assert!((r.ml_per_second - 0.95).abs() < 1e-6);
        assert!(r.is_calibrated);
        assert_eq!(r.last_calibration_time, 1_700_000_000);
    }

    #[test]
    fn recalibration_rejects_non_positive() {
        let r = CalibrationRecord::default();
        assert!(r.recalibrated(0.0, 0).is_err());
        assert!(r.recalibrated(-1.0, 0).is_err());
        assert!(r.recalibrated(f32::NAN, 0).is_err());
    }
}

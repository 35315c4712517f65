//! Hourly dose buckets and per-day summaries.
use doser_traits::clock::MIN_VALID_UNIX;
use serde::{Deserialize, Serialize};

use crate::NUM_HEADS;
use crate::util::SECS_PER_HOUR;

/// Doses stamped before 2020-01-01 are assumed to come from an unsynced clock
/// and are not logged.
pub const LOG_TIME_SANITY_UNIX: u32 = 1_577_836_800;
/// Default log retention (14 days).
pub const DEFAULT_RETENTION_HOURS: u32 = 336;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseKind {
    Scheduled,
    Adhoc,
}

/// Total volume dispensed by one head during one UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyDoseLog {
    /// Unix seconds, a multiple of 3600.
    pub hour_timestamp: u32,
    pub head: u8,
    pub scheduled_volume_ml: f32,
    pub adhoc_volume_ml: f32,
}

impl HourlyDoseLog {
    pub fn new(hour_timestamp: u32, head: u8) -> Self {
        Self {
            hour_timestamp,
            head,
            scheduled_volume_ml: 0.0,
            adhoc_volume_ml: 0.0,
        }
    }

    /// A bucket holding a single dose.
    pub fn single(hour_timestamp: u32, head: u8, kind: DoseKind, volume_ml: f32) -> Self {
        let mut log = Self::new(hour_timestamp, head);
        match kind {
            DoseKind::Scheduled => log.scheduled_volume_ml = volume_ml,
            DoseKind::Adhoc => log.adhoc_volume_ml = volume_ml,
        }
        log
    }

    pub fn total_ml(&self) -> f32 {
        self.scheduled_volume_ml + self.adhoc_volume_ml
    }

    pub fn is_valid(&self) -> bool {
        self.hour_timestamp >= MIN_VALID_UNIX
            && self.hour_timestamp % SECS_PER_HOUR == 0
            && usize::from(self.head) < NUM_HEADS
            && self.scheduled_volume_ml.is_finite()
            && self.adhoc_volume_ml.is_finite()
            && self.scheduled_volume_ml >= 0.0
            && self.adhoc_volume_ml >= 0.0
    }

    /// Component-wise sum of two buckets for the same hour and head.
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            hour_timestamp: self.hour_timestamp,
            head: self.head,
            scheduled_volume_ml: self.scheduled_volume_ml + other.scheduled_volume_ml,
            adhoc_volume_ml: self.adhoc_volume_ml + other.adhoc_volume_ml,
        }
    }
}

/// Target versus delivered volume for one head over one UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailySummary {
    pub head: u8,
    /// Midnight UTC of the summarized day.
    pub day_start: u32,
    pub daily_target_ml: f32,
    pub scheduled_actual_ml: f32,
    pub adhoc_total_ml: f32,
    pub doses_per_day: u16,
    pub per_dose_volume_ml: f32,
}

impl DailySummary {
    pub fn total_today_ml(&self) -> f32 {
        self.scheduled_actual_ml + self.adhoc_total_ml
    }

    /// Scheduled volume as a percentage of the target; 0 without a target.
    pub fn percent_complete(&self) -> f32 {
        if self.daily_target_ml > 0.0 {
            self.scheduled_actual_ml / self.daily_target_ml * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_rules() {
        assert!(HourlyDoseLog::new(1_700_000_000 - 1_700_000_000 % 3600, 0).is_valid());
        assert!(!HourlyDoseLog::new(1_700_000_001, 0).is_valid());
        assert!(!HourlyDoseLog::new(3600, 0).is_valid());
        assert!(!HourlyDoseLog::new(1_699_999_200, 4).is_valid());
        let mut neg = HourlyDoseLog::new(1_699_999_200, 1);
        neg.adhoc_volume_ml = -0.5;
        assert!(!neg.is_valid());
    }

    #[test]
    fn percent_without_target_is_zero() {
        let s = DailySummary {
            head: 0,
            day_start: 0,
            daily_target_ml: 0.0,
            scheduled_actual_ml: 5.0,
            adhoc_total_ml: 1.0,
            doses_per_day: 0,
            per_dose_volume_ml: 0.0,
        };
        assert_eq!(s.percent_complete(), 0.0);
        assert_eq!(s.total_today_ml(), 6.0);
    }
}

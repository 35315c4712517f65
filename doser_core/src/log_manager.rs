//! Dose logging front end: time-sanity gating, hourly aggregation, daily summaries.
//!
//! All store access goes through one lock. Callers must not hold it across a
//! dispense; every method here takes and releases it internally.
use std::sync::Mutex;

use crate::NUM_HEADS;
use crate::dosing_log::{DailySummary, DoseKind, HourlyDoseLog, LOG_TIME_SANITY_UNIX};
use crate::error::{DoserError, Result};
use crate::log_store::DosingLogStore;
use crate::schedule::{DailyPlan, Schedule};
use crate::util::{SECS_PER_DAY, floor_to_hour, lock, start_of_day};

/// What happened to a logged dose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogOutcome {
    /// Bucket after merging the dose.
    Recorded(HourlyDoseLog),
    /// Wall time not synced yet; the dose was not logged.
    SkippedUnsynced,
}

pub struct DosingLogManager {
    store: Mutex<DosingLogStore>,
}

impl DosingLogManager {
    pub fn new(store: DosingLogStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn log_scheduled_dose(&self, head: u8, volume_ml: f32, timestamp: u32) -> Result<LogOutcome> {
        self.log_dose(DoseKind::Scheduled, head, volume_ml, timestamp)
    }

    pub fn log_adhoc_dose(&self, head: u8, volume_ml: f32, timestamp: u32) -> Result<LogOutcome> {
        self.log_dose(DoseKind::Adhoc, head, volume_ml, timestamp)
    }

    fn log_dose(&self, kind: DoseKind, head: u8, volume_ml: f32, timestamp: u32) -> Result<LogOutcome> {
        if usize::from(head) >= NUM_HEADS {
            return Err(DoserError::InvalidHead(head).into());
        }
        if !(volume_ml.is_finite() && volume_ml >= 0.0) {
            return Err(DoserError::Validation(format!("dose volume {volume_ml} mL must be >= 0")).into());
        }
        if timestamp < LOG_TIME_SANITY_UNIX {
            tracing::debug!(head, ?kind, timestamp, "wall time not synced; dose not logged");
            return Ok(LogOutcome::SkippedUnsynced);
        }
        let entry = HourlyDoseLog::single(floor_to_hour(timestamp), head, kind, volume_ml);
        let merged = lock(&self.store).save_log(&entry)?;
        tracing::debug!(head, ?kind, volume_ml, hour = merged.hour_timestamp, "dose logged");
        Ok(LogOutcome::Recorded(merged))
    }

    pub fn load_log(&self, timestamp: u32, head: u8) -> Result<Option<HourlyDoseLog>> {
        lock(&self.store).load_log(timestamp, head)
    }

    pub fn hourly_logs(&self, start: u32, end: u32) -> Result<Vec<HourlyDoseLog>> {
        lock(&self.store).load_logs_in_range(start, end)
    }

    /// Summary of the UTC day containing `now` for one head.
    pub fn daily_summary(
        &self,
        head: u8,
        now: u32,
        daily_target_ml: f32,
        doses_per_day: u16,
        per_dose_volume_ml: f32,
    ) -> Result<DailySummary> {
        if usize::from(head) >= NUM_HEADS {
            return Err(DoserError::InvalidHead(head).into());
        }
        let day_start = start_of_day(now);
        let day_end = day_start.saturating_add(SECS_PER_DAY - 1);
        let logs = lock(&self.store).load_logs_in_range(day_start, day_end)?;
        let (scheduled, adhoc) = logs
            .iter()
            .filter(|l| l.head == head)
            .fold((0.0f32, 0.0f32), |(s, a), l| {
                (s + l.scheduled_volume_ml, a + l.adhoc_volume_ml)
            });
        Ok(DailySummary {
            head,
            day_start,
            daily_target_ml,
            scheduled_actual_ml: scheduled,
            adhoc_total_ml: adhoc,
            doses_per_day,
            per_dose_volume_ml,
        })
    }

    /// One summary per head, targets taken from each slot's daily plan.
    pub fn all_daily_summaries(
        &self,
        now: u32,
        schedules: &[Option<Schedule>; NUM_HEADS],
    ) -> Result<Vec<DailySummary>> {
        let day_start = start_of_day(now);
        let day_end = day_start.saturating_add(SECS_PER_DAY - 1);
        let logs = lock(&self.store).load_logs_in_range(day_start, day_end)?;

        let summaries = schedules
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let head = i as u8;
                let plan = slot.as_ref().and_then(Schedule::daily_plan).unwrap_or(DailyPlan {
                    target_ml: 0.0,
                    doses_per_day: 0,
                    per_dose_ml: 0.0,
                });
                let mut summary = DailySummary {
                    head,
                    day_start,
                    daily_target_ml: plan.target_ml,
                    scheduled_actual_ml: 0.0,
                    adhoc_total_ml: 0.0,
                    doses_per_day: plan.doses_per_day,
                    per_dose_volume_ml: plan.per_dose_ml,
                };
                for l in logs.iter().filter(|l| l.head == head) {
                    summary.scheduled_actual_ml += l.scheduled_volume_ml;
                    summary.adhoc_total_ml += l.adhoc_volume_ml;
                }
                summary
            })
            .collect();
        Ok(summaries)
    }

    pub fn prune_old_logs(&self, now: u32) -> Result<u32> {
        lock(&self.store).prune_old_logs(now)
    }

    pub fn clear_all(&self) -> Result<()> {
        lock(&self.store).clear_all()?;
        tracing::info!("all hourly logs cleared");
        Ok(())
    }

    pub fn log_count(&self) -> Result<usize> {
        lock(&self.store).log_count()
    }
}

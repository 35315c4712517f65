//! `Doser`: the four heads, schedules and dose logs wired together.
use std::sync::Arc;
use std::time::Instant;

use doser_traits::MotorDriver;
use doser_traits::clock::{Clock, MIN_VALID_UNIX, WallClock};
use serde::Serialize;

use crate::NUM_HEADS;
use crate::builder::DoserBuilder;
use crate::calibration::CalibrationRecord;
use crate::dosing_log::{DailySummary, HourlyDoseLog};
use crate::error::{DoserError, Result};
use crate::head::{DosingHead, DosingResult};
use crate::log_manager::{DosingLogManager, LogOutcome};
use crate::schedule::{Schedule, ScheduleState};
use crate::scheduler::{ScheduleManager, TickReport};

/// Point-in-time view of one head.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadStatus {
    pub head: u8,
    pub ml_per_second: f32,
    pub is_calibrated: bool,
    pub last_calibration_time: u32,
    pub dispensing: bool,
    pub schedule_state: ScheduleState,
    pub next_due: Option<u32>,
}

pub struct Doser {
    motor: Arc<dyn MotorDriver>,
    heads: Vec<DosingHead>,
    schedules: ScheduleManager,
    logs: Arc<DosingLogManager>,
    clock: Arc<dyn Clock + Send + Sync>,
    wall: Arc<dyn WallClock + Send + Sync>,
    epoch: Instant,
}

impl std::fmt::Debug for Doser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Doser")
            .field("heads", &self.heads)
            .finish_non_exhaustive()
    }
}

impl Doser {
    pub fn builder() -> DoserBuilder {
        DoserBuilder::default()
    }

    pub(crate) fn from_parts(
        motor: Arc<dyn MotorDriver>,
        heads: Vec<DosingHead>,
        schedules: ScheduleManager,
        logs: Arc<DosingLogManager>,
        clock: Arc<dyn Clock + Send + Sync>,
        wall: Arc<dyn WallClock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            motor,
            heads,
            schedules,
            logs,
            clock,
            wall,
            epoch,
        }
    }

    pub fn head(&self, head: u8) -> Result<&DosingHead> {
        self.heads
            .get(usize::from(head))
            .ok_or_else(|| DoserError::InvalidHead(head).into())
    }

    pub fn heads(&self) -> &[DosingHead] {
        &self.heads
    }

    pub fn schedule_manager(&self) -> &ScheduleManager {
        &self.schedules
    }

    pub fn log_manager(&self) -> &Arc<DosingLogManager> {
        &self.logs
    }

    /// Unix seconds, 0 while wall time is unsynced.
    pub fn now_unix(&self) -> u32 {
        self.wall.now_unix()
    }

    /// Whole seconds since this `Doser` was built.
    pub fn uptime_secs(&self) -> u32 {
        u32::try_from(self.clock.ms_since(self.epoch) / 1000).unwrap_or(u32::MAX)
    }

    /// Time base for schedule evaluation: wall time, or uptime seconds (never 0)
    /// while unsynced if `allow_uptime` is set.
    pub fn scheduler_now(&self, allow_uptime: bool) -> Option<u32> {
        match self.wall.now_unix() {
            0 if allow_uptime => Some(self.uptime_secs().max(1)),
            0 => None,
            now => Some(now),
        }
    }

    /// Ad-hoc dispense; a successful dose is logged as ad-hoc volume.
    pub fn try_dispense(&self, head: u8, volume_ml: f32) -> Result<DosingResult> {
        let result = self.head(head)?.try_dispense(volume_ml)?;
        self.log_adhoc(head, result.estimated_volume_ml);
        Ok(result)
    }

    /// Like `try_dispense`, reporting failures inside the result.
    pub fn dispense(&self, head: u8, volume_ml: f32) -> DosingResult {
        match self.try_dispense(head, volume_ml) {
            Ok(r) => r,
            Err(e) => DosingResult::failed(volume_ml, e.to_string()),
        }
    }

    fn log_adhoc(&self, head: u8, volume_ml: f32) {
        match self
            .logs
            .log_adhoc_dose(head, volume_ml, self.wall.now_unix())
        {
            Ok(LogOutcome::Recorded(_) | LogOutcome::SkippedUnsynced) => {}
            Err(e) => tracing::warn!(head, error = %e, "failed to log ad-hoc dose"),
        }
    }

    /// Timed run that ignores calibration and is not logged.
    pub fn run_for_duration(&self, head: u8, runtime_ms: u32) -> Result<u32> {
        self.head(head)?.run_for_duration(runtime_ms)
    }

    pub fn calibrate(&self, head: u8, actual_ml: f32) -> Result<CalibrationRecord> {
        self.head(head)?.calibrate(actual_ml)
    }

    pub fn reset_calibration(&self, head: u8) -> Result<()> {
        self.head(head)?.reset_calibration()
    }

    pub fn calibration(&self, head: u8) -> Result<CalibrationRecord> {
        Ok(self.head(head)?.calibration())
    }

    pub fn set_schedule(&self, schedule: Schedule) -> Result<Schedule> {
        self.schedules.set_schedule(schedule, self.wall.now_unix())
    }

    pub fn get_schedule(&self, head: u8) -> Result<Option<Schedule>> {
        self.schedules.get_schedule(head)
    }

    pub fn delete_schedule(&self, head: u8) -> Result<bool> {
        self.schedules.delete_schedule(head, self.wall.now_unix())
    }

    /// Enabled schedules.
    pub fn schedules(&self) -> Vec<Schedule> {
        self.schedules.get_all_schedules()
    }

    pub fn clear_schedules(&self) -> Result<()> {
        self.schedules.clear_all()
    }

    /// Execute every schedule due at `now`.
    ///
    /// Once `now` is wall time, execution stamps left from unsynced uptime
    /// ticks are rebased first so they are not compared against wall time.
    pub fn run_due_schedules(&self, now: u32) -> TickReport {
        if now >= MIN_VALID_UNIX {
            self.schedules.rebase_uptime_stamps(now, self.uptime_secs());
        }
        self.schedules.check_and_execute(now, &self.heads)
    }

    pub fn hourly_logs(&self, start: u32, end: u32) -> Result<Vec<HourlyDoseLog>> {
        self.logs.hourly_logs(start, end)
    }

    /// Today's summary for one head, target taken from its schedule.
    pub fn daily_summary(&self, head: u8, now: u32) -> Result<DailySummary> {
        let plan = self
            .schedules
            .get_schedule(head)?
            .as_ref()
            .and_then(Schedule::daily_plan);
        match plan {
            Some(p) => self
                .logs
                .daily_summary(head, now, p.target_ml, p.doses_per_day, p.per_dose_ml),
            None => self.logs.daily_summary(head, now, 0.0, 0, 0.0),
        }
    }

    pub fn all_daily_summaries(&self, now: u32) -> Result<Vec<DailySummary>> {
        self.logs.all_daily_summaries(now, &self.schedules.slots())
    }

    pub fn prune_old_logs(&self, now: u32) -> Result<u32> {
        self.logs.prune_old_logs(now)
    }

    pub fn clear_logs(&self) -> Result<()> {
        self.logs.clear_all()
    }

    pub fn log_count(&self) -> Result<usize> {
        self.logs.log_count()
    }

    /// Brake every channel and cut driver power. Running dispenses still
    /// return after their nominal duration.
    pub fn emergency_stop_all(&self) {
        tracing::warn!("emergency stop requested");
        self.motor.emergency_stop_all();
    }

    pub fn status(&self, now: u32) -> Vec<HeadStatus> {
        let slots = self.schedules.slots();
        (0..NUM_HEADS)
            .map(|i| {
                let head = &self.heads[i];
                let cal = head.calibration();
                let schedule = slots[i].as_ref();
                HeadStatus {
                    head: head.index(),
                    ml_per_second: cal.ml_per_second,
                    is_calibrated: cal.is_calibrated,
                    last_calibration_time: cal.last_calibration_time,
                    dispensing: head.is_dispensing(),
                    schedule_state: self
                        .schedules
                        .state(head.index(), now)
                        .unwrap_or(ScheduleState::Disabled),
                    next_due: schedule.and_then(|s| s.next_due(now)),
                }
            })
            .collect()
    }
}

//! Schedule records and due-time evaluation.
use doser_traits::clock::MIN_VALID_UNIX;
use serde::{Deserialize, Serialize};

use crate::NUM_HEADS;
use crate::error::{DoserError, Result};
use crate::util::{SECS_PER_DAY, day_index, start_of_day, time_of_day};

pub const MIN_INTERVAL_S: u32 = 60;
pub const MAX_INTERVAL_S: u32 = SECS_PER_DAY;
pub const MAX_SCHEDULE_VOLUME_ML: f32 = 1000.0;
pub const MAX_DAILY_TARGET_ML: f32 = 10_000.0;
pub const MAX_DOSES_PER_DAY: u16 = 1440;
/// Longest schedule name in bytes.
pub const MAX_NAME_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Fire once at or after `at` (unix seconds).
    Once { at: u32 },
    /// Fire once per UTC day at or after `time_of_day_s` seconds past midnight.
    Daily { time_of_day_s: u32 },
    /// Fire every `interval_s` seconds.
    Interval { interval_s: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    Disabled,
    Pending,
    Due,
    Executing,
}

/// Daily dosing plan derived from a schedule, used for summaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyPlan {
    pub target_ml: f32,
    pub doses_per_day: u16,
    pub per_dose_ml: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub head: u8,
    pub enabled: bool,
    pub volume_ml: f32,
    /// Set when the schedule was derived from a daily target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_target_ml: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doses_per_day: Option<u16>,
    #[serde(default)]
    pub last_execution_time: u32,
    #[serde(default)]
    pub execution_count: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: u32,
    #[serde(default)]
    pub updated_at: u32,
    pub kind: ScheduleKind,
}

impl Schedule {
    fn with_kind(head: u8, volume_ml: f32, kind: ScheduleKind) -> Self {
        Self {
            head,
            enabled: true,
            volume_ml,
            daily_target_ml: None,
            doses_per_day: None,
            last_execution_time: 0,
            execution_count: 0,
            name: String::new(),
            created_at: 0,
            updated_at: 0,
            kind,
        }
    }

    pub fn interval(head: u8, volume_ml: f32, interval_s: u32) -> Self {
        Self::with_kind(head, volume_ml, ScheduleKind::Interval { interval_s })
    }

    pub fn daily(head: u8, volume_ml: f32, time_of_day_s: u32) -> Self {
        Self::with_kind(head, volume_ml, ScheduleKind::Daily { time_of_day_s })
    }

    pub fn once(head: u8, volume_ml: f32, at: u32) -> Self {
        Self::with_kind(head, volume_ml, ScheduleKind::Once { at })
    }

    /// Interval schedule spreading `target_ml` over `doses_per_day` equal doses.
    pub fn from_daily_target(head: u8, target_ml: f32, doses_per_day: u16) -> Result<Self> {
        let mut s = Self::interval(head, 0.0, 0);
        s.set_daily_target(target_ml, doses_per_day)?;
        Ok(s)
    }

    /// Re-derive volume and interval from a daily target.
    ///
    /// Interval is `86400 / doses` seconds (truncated), volume is `target / doses`.
    pub fn set_daily_target(&mut self, target_ml: f32, doses_per_day: u16) -> Result<()> {
        if !(target_ml.is_finite() && target_ml > 0.0 && target_ml <= MAX_DAILY_TARGET_ML) {
            return Err(DoserError::Validation(format!(
                "daily target {target_ml} mL outside (0, {MAX_DAILY_TARGET_ML}]"
            ))
            .into());
        }
        if !(1..=MAX_DOSES_PER_DAY).contains(&doses_per_day) {
            return Err(DoserError::Validation(format!(
                "doses per day {doses_per_day} outside [1, {MAX_DOSES_PER_DAY}]"
            ))
            .into());
        }
        let per_dose = target_ml / f32::from(doses_per_day);
        if per_dose > MAX_SCHEDULE_VOLUME_ML {
            return Err(DoserError::Validation(format!(
                "per-dose volume {per_dose} mL exceeds {MAX_SCHEDULE_VOLUME_ML} mL"
            ))
            .into());
        }
        self.volume_ml = per_dose;
        self.daily_target_ml = Some(target_ml);
        self.doses_per_day = Some(doses_per_day);
        self.kind = ScheduleKind::Interval {
            interval_s: SECS_PER_DAY / u32::from(doses_per_day),
        };
        Ok(())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), DoserError> {
        if usize::from(self.head) >= NUM_HEADS {
            return Err(DoserError::InvalidHead(self.head));
        }
        if !(self.volume_ml.is_finite()
            && self.volume_ml > 0.0
            && self.volume_ml <= MAX_SCHEDULE_VOLUME_ML)
        {
            return Err(DoserError::Validation(format!(
                "schedule volume {} mL outside (0, {MAX_SCHEDULE_VOLUME_ML}]",
                self.volume_ml
            )));
        }
        match self.kind {
            ScheduleKind::Interval { interval_s } => {
                if !(MIN_INTERVAL_S..=MAX_INTERVAL_S).contains(&interval_s) {
                    return Err(DoserError::Validation(format!(
                        "interval {interval_s} s outside [{MIN_INTERVAL_S}, {MAX_INTERVAL_S}]"
                    )));
                }
            }
            ScheduleKind::Daily { time_of_day_s } => {
                if time_of_day_s >= SECS_PER_DAY {
                    return Err(DoserError::Validation(format!(
                        "time of day {time_of_day_s} s must be < {SECS_PER_DAY}"
                    )));
                }
            }
            ScheduleKind::Once { at } => {
                if at < MIN_VALID_UNIX {
                    return Err(DoserError::Validation(format!(
                        "one-shot time {at} predates 2000-01-01"
                    )));
                }
            }
        }
        match (self.daily_target_ml, self.doses_per_day) {
            (None, None) => {}
            (Some(target), Some(doses)) => {
                if !matches!(self.kind, ScheduleKind::Interval { .. }) {
                    return Err(DoserError::Validation(
                        "daily target requires an interval schedule".into(),
                    ));
                }
                if !(target.is_finite() && target > 0.0 && target <= MAX_DAILY_TARGET_ML) {
                    return Err(DoserError::Validation(format!(
                        "daily target {target} mL outside (0, {MAX_DAILY_TARGET_ML}]"
                    )));
                }
                if !(1..=MAX_DOSES_PER_DAY).contains(&doses) {
                    return Err(DoserError::Validation(format!(
                        "doses per day {doses} outside [1, {MAX_DOSES_PER_DAY}]"
                    )));
                }
            }
            _ => {
                return Err(DoserError::Validation(
                    "daily target and doses per day must be set together".into(),
                ));
            }
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(DoserError::Validation(format!(
                "schedule name longer than {MAX_NAME_LEN} bytes"
            )));
        }
        Ok(())
    }

    /// Whether the schedule should fire at `now` (unix seconds, or uptime
    /// seconds when wall time is unavailable).
    ///
    /// Daily and one-shot schedules need real wall time. A clock that reads
    /// earlier than the last execution counts as no time elapsed.
    pub fn should_execute(&self, now: u32) -> bool {
        if !self.enabled || self.validate().is_err() {
            return false;
        }
        let last = self.last_execution_time;
        match self.kind {
            ScheduleKind::Interval { interval_s } => {
                last == 0 || now.saturating_sub(last) >= interval_s
            }
            ScheduleKind::Daily { time_of_day_s } => {
                now >= MIN_VALID_UNIX
                    && time_of_day(now) >= time_of_day_s
                    && day_index(now) > day_index(last)
            }
            ScheduleKind::Once { at } => last == 0 && now >= MIN_VALID_UNIX && now >= at,
        }
    }

    pub fn state(&self, now: u32, executing: bool) -> ScheduleState {
        if !self.enabled {
            ScheduleState::Disabled
        } else if executing {
            ScheduleState::Executing
        } else if self.should_execute(now) {
            ScheduleState::Due
        } else {
            ScheduleState::Pending
        }
    }

    /// Earliest time the schedule becomes due, if it ever will.
    pub fn next_due(&self, now: u32) -> Option<u32> {
        if !self.enabled {
            return None;
        }
        let last = self.last_execution_time;
        match self.kind {
            ScheduleKind::Interval { interval_s } => {
                if last == 0 {
                    Some(now)
                } else {
                    Some(last.saturating_add(interval_s).max(now))
                }
            }
            ScheduleKind::Daily { time_of_day_s } => {
                let today = start_of_day(now).saturating_add(time_of_day_s);
                if day_index(now) > day_index(last) && now < today {
                    Some(today)
                } else if self.should_execute(now) {
                    Some(now)
                } else {
                    Some(today.saturating_add(SECS_PER_DAY))
                }
            }
            ScheduleKind::Once { at } => (last == 0).then_some(at.max(now)),
        }
    }

    /// Daily volume plan for summaries. One-shot schedules have none.
    pub fn daily_plan(&self) -> Option<DailyPlan> {
        if !self.enabled {
            return None;
        }
        if let (Some(target_ml), Some(doses_per_day)) = (self.daily_target_ml, self.doses_per_day)
        {
            return Some(DailyPlan {
                target_ml,
                doses_per_day,
                per_dose_ml: self.volume_ml,
            });
        }
        let doses_per_day = match self.kind {
            ScheduleKind::Interval { interval_s } if interval_s > 0 => {
                u16::try_from(SECS_PER_DAY / interval_s).ok()?
            }
            ScheduleKind::Daily { .. } => 1,
            _ => return None,
        };
        Some(DailyPlan {
            target_ml: self.volume_ml * f32::from(doses_per_day),
            doses_per_day,
            per_dose_ml: self.volume_ml,
        })
    }
}

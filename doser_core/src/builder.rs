//! Builder for the `Doser` composition root.
//!
//! Motor driver and storage are required; clocks default to the real ones and
//! retention to 14 days.
use std::sync::Arc;

use doser_traits::clock::{Clock, MonotonicClock, SystemWallClock, WallClock};
use doser_traits::{MotorDriver, Storage};

use crate::NUM_HEADS;
use crate::calibration::CalibrationStore;
use crate::config::RetentionCfg;
use crate::doser::Doser;
use crate::error::{BuildError, Result};
use crate::head::DosingHead;
use crate::log_manager::DosingLogManager;
use crate::log_store::DosingLogStore;
use crate::schedule_store::ScheduleStore;
use crate::scheduler::ScheduleManager;

#[derive(Default)]
pub struct DoserBuilder {
    motor: Option<Arc<dyn MotorDriver>>,
    storage: Option<Arc<dyn Storage>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    wall: Option<Arc<dyn WallClock + Send + Sync>>,
    retention: Option<RetentionCfg>,
}

impl DoserBuilder {
    pub fn with_motor(mut self, motor: impl MotorDriver + 'static) -> Self {
        self.motor = Some(Arc::new(motor));
        self
    }

    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Monotonic clock used to time motor runs.
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Calendar time used for logging and schedule evaluation.
    pub fn with_wall_clock(mut self, wall: impl WallClock + Send + Sync + 'static) -> Self {
        self.wall = Some(Arc::new(wall));
        self
    }

    pub fn with_retention(mut self, retention: RetentionCfg) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn build(self) -> Result<Doser> {
        let motor = self.motor.ok_or(BuildError::MissingMotor)?;
        let storage = self.storage.ok_or(BuildError::MissingStorage)?;
        if usize::from(motor.channel_count()) < NUM_HEADS {
            return Err(BuildError::InvalidConfig("motor driver has fewer than 4 channels").into());
        }
        let retention = self.retention.unwrap_or_default();
        if retention.retention_hours == 0 || retention.lookback_days == 0 {
            return Err(BuildError::InvalidConfig("log retention must be non-zero").into());
        }
        let clock: Arc<dyn Clock + Send + Sync> = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let wall: Arc<dyn WallClock + Send + Sync> =
            self.wall.unwrap_or_else(|| Arc::new(SystemWallClock));

        let calibration = CalibrationStore::new(storage.clone());
        let heads = (0..NUM_HEADS as u8)
            .map(|i| {
                DosingHead::open(
                    i,
                    motor.clone(),
                    calibration.clone(),
                    clock.clone(),
                    wall.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let logs = Arc::new(DosingLogManager::new(DosingLogStore::new(
            storage.clone(),
            retention,
        )));
        let schedules =
            ScheduleManager::open(ScheduleStore::new(storage)).with_log_manager(logs.clone());

        Ok(Doser::from_parts(motor, heads, schedules, logs, clock, wall))
    }
}

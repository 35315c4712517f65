#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core dosing logic (hardware-agnostic).
//!
//! Four peristaltic heads share one motor driver (`doser_traits::MotorDriver`)
//! and one key-value store (`doser_traits::Storage`).
//!
//! ## Architecture
//!
//! - **Heads**: volume to runtime conversion, blocking dispense, per-head run
//!   lock (`head`), flow-rate calibration (`calibration`)
//! - **Schedules**: once/daily/interval rules (`schedule`), persisted per head
//!   (`schedule_store`), executed by `scheduler::ScheduleManager`
//! - **Logs**: hourly per-head buckets (`dosing_log`, `log_store`) and daily
//!   summaries (`log_manager`)
//! - **Driver**: background tick thread (`driver`)
//! - **Composition**: `Doser` and its builder
//!
//! Locks on schedules and logs are never held while a motor runs.

pub mod builder;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod doser;
pub mod dosing_log;
pub mod driver;
pub mod error;
pub mod head;
pub mod hw_error;
pub mod log_manager;
pub mod log_store;
pub mod mocks;
pub mod schedule;
pub mod schedule_store;
pub mod scheduler;
pub mod storage;
pub mod util;

/// Number of dosing heads.
pub const NUM_HEADS: usize = 4;

pub use builder::DoserBuilder;
pub use calibration::{CalibrationRecord, CalibrationStore};
pub use config::{DriverCfg, RetentionCfg};
pub use doser::{Doser, HeadStatus};
pub use dosing_log::{DailySummary, DoseKind, HourlyDoseLog};
pub use driver::SchedulerDriver;
pub use error::{BuildError, DoserError, Report, Result};
pub use head::{DosingHead, DosingResult};
pub use log_manager::{DosingLogManager, LogOutcome};
pub use log_store::DosingLogStore;
pub use schedule::{DailyPlan, Schedule, ScheduleKind, ScheduleState};
pub use schedule_store::ScheduleStore;
pub use scheduler::{ExecutedDose, FailedDose, ScheduleManager, TickReport};
pub use storage::{FileStorage, MemoryStorage};

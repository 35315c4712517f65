//! Runtime configuration for the dosing engine.
//!
//! These are separate from the TOML-deserialized config in `doser_config`;
//! see `conversions` for the mapping.
use std::time::Duration;

use crate::dosing_log::DEFAULT_RETENTION_HOURS;

/// Hourly log retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionCfg {
    /// Buckets whose hour is older than `now - retention_hours` are pruned.
    pub retention_hours: u32,
    /// How many days before the cutoff a prune pass scans.
    pub lookback_days: u32,
}

impl Default for RetentionCfg {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_RETENTION_HOURS,
            lookback_days: 30,
        }
    }
}

/// Background scheduler loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCfg {
    pub tick: Duration,
    /// Evaluate schedules against uptime seconds while wall time is unsynced.
    pub run_before_time_sync: bool,
    /// `None` disables periodic log pruning.
    pub prune_every: Option<Duration>,
}

impl Default for DriverCfg {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            run_before_time_sync: true,
            prune_every: Some(Duration::from_secs(3600)),
        }
    }
}

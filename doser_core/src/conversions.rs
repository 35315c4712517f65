//! `From` implementations bridging `doser_config` types to `doser_core` types.
use std::time::Duration;

use crate::config::{DriverCfg, RetentionCfg};

impl From<&doser_config::LogsCfg> for RetentionCfg {
    fn from(c: &doser_config::LogsCfg) -> Self {
        Self {
            retention_hours: c.retention_hours,
            lookback_days: c.prune_lookback_days,
        }
    }
}

impl From<&doser_config::SchedulerCfg> for DriverCfg {
    fn from(c: &doser_config::SchedulerCfg) -> Self {
        Self {
            tick: Duration::from_millis(c.tick_ms),
            run_before_time_sync: c.run_before_time_sync,
            prune_every: (c.prune_interval_s > 0).then(|| Duration::from_secs(c.prune_interval_s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_agree_with_config_defaults() {
        let cfg = doser_config::Config::default();
        assert_eq!(RetentionCfg::from(&cfg.logs), RetentionCfg::default());
        assert_eq!(DriverCfg::from(&cfg.scheduler), DriverCfg::default());
    }

    #[test]
    fn zero_prune_interval_disables_pruning() {
        let sched = doser_config::SchedulerCfg {
            prune_interval_s: 0,
            ..Default::default()
        };
        assert_eq!(DriverCfg::from(&sched).prune_every, None);
    }
}

#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the dosing daemon and CLI.
//!
//! `Config` and its sections are deserialized from TOML and validated with
//! `Config::validate`. Every section has defaults, so an empty file is a valid
//! simulation config.
use serde::Deserialize;
use std::path::PathBuf;

/// Where calibration, schedules and hourly logs are kept.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageCfg {
    pub data_dir: PathBuf,
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("var/doser"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerCfg {
    /// Due-check cadence in milliseconds.
    pub tick_ms: u64,
    /// Run interval schedules on uptime seconds before wall time is synced.
    pub run_before_time_sync: bool,
    /// How often the daemon prunes expired hourly logs (seconds, 0 disables).
    pub prune_interval_s: u64,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            run_before_time_sync: true,
            prune_interval_s: 3600,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogsCfg {
    /// Hourly buckets older than this are pruned (default: 14 days).
    pub retention_hours: u32,
    /// How far behind the cutoff a prune pass looks for stale buckets.
    pub prune_lookback_days: u32,
}

impl Default for LogsCfg {
    fn default() -> Self {
        Self {
            retention_hours: 336,
            prune_lookback_days: 30,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// BCM pins of one TB6612 channel.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct HeadPins {
    pub in1: u8,
    pub in2: u8,
    pub pwm: u8,
}

/// GPIO wiring. Only read by hardware builds.
#[derive(Debug, Deserialize)]
pub struct Pins {
    /// Standby pin shared by both drivers.
    pub stby: u8,
    pub heads: Vec<HeadPins>,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            stby: 14,
            heads: vec![
                HeadPins {
                    in1: 16,
                    in2: 15,
                    pwm: 7,
                },
                HeadPins {
                    in1: 6,
                    in2: 5,
                    pwm: 4,
                },
                HeadPins {
                    in1: 13,
                    in2: 12,
                    pwm: 11,
                },
                HeadPins {
                    in1: 21,
                    in2: 20,
                    pwm: 26,
                },
            ],
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageCfg,
    #[serde(default)]
    pub scheduler: SchedulerCfg,
    #[serde(default)]
    pub logs: LogsCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub pins: Option<Pins>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Number of dosing heads wired on the board.
pub const HEAD_COUNT: usize = 4;

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Storage
        if self.storage.data_dir.as_os_str().is_empty() {
            eyre::bail!("storage.data_dir must not be empty");
        }

        // Scheduler
        if !(10..=60_000).contains(&self.scheduler.tick_ms) {
            eyre::bail!("scheduler.tick_ms must be in [10, 60000]");
        }
        if self.scheduler.prune_interval_s > 7 * 24 * 3600 {
            eyre::bail!("scheduler.prune_interval_s is unreasonably large (>7d)");
        }

        // Logs
        if !(1..=8760).contains(&self.logs.retention_hours) {
            eyre::bail!("logs.retention_hours must be in [1, 8760]");
        }
        if !(1..=365).contains(&self.logs.prune_lookback_days) {
            eyre::bail!("logs.prune_lookback_days must be in [1, 365]");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got {rot:?}");
        }

        // Pins
        if let Some(pins) = &self.pins {
            if pins.heads.len() != HEAD_COUNT {
                eyre::bail!(
                    "pins.heads must list exactly {HEAD_COUNT} channels, got {}",
                    pins.heads.len()
                );
            }
            let mut seen = vec![pins.stby];
            for (i, h) in pins.heads.iter().enumerate() {
                for p in [h.in1, h.in2, h.pwm] {
                    if seen.contains(&p) {
                        eyre::bail!("pins.heads[{i}] reuses pin {p}");
                    }
                    seen.push(p);
                }
            }
        }

        Ok(())
    }
}

//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(name = "doser", version, about = "Four-head liquid doser CLI")]
pub struct Cli {
    /// Path to config TOML (typed). A missing file means built-in defaults.
    #[arg(long, value_name = "FILE", default_value = "etc/doser_config.toml")]
    pub config: PathBuf,

    /// Override `[storage] data_dir` from the config
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Print results and errors as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispense a volume using the head's calibration
    Dose {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: u8,
        /// Volume in millilitres (0.1..=1000)
        #[arg(long)]
        ml: f32,
    },
    /// Run a head for a fixed time, ignoring calibration
    RunFor {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: u8,
        /// Runtime in milliseconds (100..=300000)
        #[arg(long)]
        ms: u32,
    },
    /// Record the volume measured after a 4 mL calibration run
    Calibrate {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: u8,
        /// Measured volume in millilitres
        #[arg(long = "actual-ml")]
        actual_ml: f32,
    },
    /// Inspect or reset calibration
    #[command(subcommand)]
    Calibration(CalibrationCmd),
    /// Manage dosing schedules
    #[command(subcommand)]
    Schedule(ScheduleCmd),
    /// Query and maintain hourly dose logs
    #[command(subcommand)]
    Logs(LogsCmd),
    /// Run the scheduler in the foreground until Ctrl-C
    Run {
        /// Stop after this many seconds (0 runs until interrupted)
        #[arg(long, value_name = "SECS", default_value_t = 0)]
        duration_s: u64,
    },
    /// Brake every channel and drop driver standby
    Estop,
    /// Print head status (calibration, schedule state) and check storage
    SelfCheck,
}

#[derive(Subcommand, Debug)]
pub enum CalibrationCmd {
    /// Show calibration for one head, or all heads
    Show {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: Option<u8>,
    },
    /// Restore the default rate for a head
    Reset {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: u8,
    },
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCmd {
    /// Interval schedule: fixed volume every N seconds, or a daily target split evenly
    Set {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: u8,
        #[arg(long, conflicts_with_all = ["daily_target_ml", "doses_per_day"], requires = "interval_s")]
        volume_ml: Option<f32>,
        #[arg(long, requires = "volume_ml")]
        interval_s: Option<u32>,
        #[arg(long, requires = "doses_per_day")]
        daily_target_ml: Option<f32>,
        #[arg(long, requires = "daily_target_ml")]
        doses_per_day: Option<u16>,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Dose once per UTC day at a time of day
    Daily {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: u8,
        #[arg(long)]
        volume_ml: f32,
        /// Time of day as HH:MM (UTC)
        #[arg(long, value_parser = parse_time_of_day)]
        at: u32,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Dose once at a unix timestamp
    Once {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: u8,
        #[arg(long)]
        volume_ml: f32,
        /// Unix seconds
        #[arg(long)]
        at: u32,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Show the stored schedule of a head
    Get {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: u8,
    },
    /// List enabled schedules
    List,
    /// Disable the schedule of a head
    Delete {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: u8,
    },
    /// Remove every stored schedule
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum LogsCmd {
    /// Hourly buckets between two unix timestamps (inclusive, default last 24h)
    Hourly {
        #[arg(long)]
        start: Option<u32>,
        #[arg(long)]
        end: Option<u32>,
    },
    /// Today's target versus delivered volume
    Summary {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        head: Option<u8>,
    },
    /// Delete buckets older than the retention window
    Prune,
    /// Delete every bucket
    Clear,
    /// Number of stored buckets
    Count,
}

/// `HH:MM` or `HH:MM:SS` to seconds past midnight.
pub fn parse_time_of_day(s: &str) -> Result<u32, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(format!("expected HH:MM, got {s:?}"));
    }
    let mut fields = [0u32; 3];
    for (slot, part) in fields.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| format!("not a number: {part:?}"))?;
    }
    let [h, m, sec] = fields;
    if h > 23 || m > 59 || sec > 59 {
        return Err(format!("time of day out of range: {s:?}"));
    }
    Ok(h * 3600 + m * 60 + sec)
}

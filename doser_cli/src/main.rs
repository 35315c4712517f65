//! `doser` binary: config loading, tracing setup, backend selection and
//! command dispatch.

mod cli;
mod error_fmt;

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use doser_config::Config;
use doser_core::{
    DailySummary, Doser, DriverCfg, FileStorage, HourlyDoseLog, RetentionCfg, Schedule,
    SchedulerDriver,
};
use doser_traits::MotorDriver;
use eyre::{Result, WrapErr};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{CalibrationCmd, Cli, Commands, FILE_GUARD, JSON_MODE, LogsCmd, ScheduleCmd};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(cli) {
        if cli::json_mode() {
            eprintln!("{}", error_fmt::format_error_json(&e));
        } else {
            eprintln!("{}", error_fmt::humanize(&e));
        }
        std::process::exit(error_fmt::exit_code_for_error(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut cfg = load_config(&cli.config)?;
    if let Some(dir) = cli.data_dir.clone() {
        cfg.storage.data_dir = dir;
    }
    init_tracing(&cli, &cfg)?;
    tracing::debug!(config = %cli.config.display(), data_dir = %cfg.storage.data_dir.display(), "config loaded");

    let doser = build_doser(&cfg)?;
    dispatch(&doser, &cfg, cli.cmd)
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = doser_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn init_tracing(cli: &Cli, cfg: &Config) -> Result<()> {
    let level = cfg.logging.level.as_deref().unwrap_or(&cli.log_level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console = if cli.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = match cfg.logging.file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name"))?;
            let appender = match cfg.logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")
}

fn build_doser(cfg: &Config) -> Result<Arc<Doser>> {
    let storage = FileStorage::open(&cfg.storage.data_dir)
        .wrap_err_with(|| format!("open data dir {}", cfg.storage.data_dir.display()))?;
    let motor = motor_driver(cfg)?;
    let doser = Doser::builder()
        .with_motor(motor)
        .with_storage(storage)
        .with_retention(RetentionCfg::from(&cfg.logs))
        .build()?;
    Ok(Arc::new(doser))
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn motor_driver(cfg: &Config) -> Result<Arc<dyn MotorDriver>> {
    use doser_hardware::tb6612::{ChannelPins, Tb6612Driver};

    let pins = match &cfg.pins {
        Some(p) => p,
        None => eyre::bail!("invalid configuration: [pins] is required for hardware builds"),
    };
    let mut channels = [ChannelPins {
        in1: 0,
        in2: 0,
        pwm: 0,
    }; doser_hardware::NUM_CHANNELS];
    for (slot, h) in channels.iter_mut().zip(&pins.heads) {
        *slot = ChannelPins {
            in1: h.in1,
            in2: h.in2,
            pwm: h.pwm,
        };
    }
    let driver = Tb6612Driver::new(pins.stby, channels).wrap_err("open motor pins")?;
    Ok(Arc::new(driver))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn motor_driver(_cfg: &Config) -> Result<Arc<dyn MotorDriver>> {
    tracing::info!("using simulated motor driver");
    Ok(Arc::new(doser_hardware::SimulatedMotorDriver::new()))
}

/// Emit either a JSON document or the text lines on stdout.
fn emit(value: serde_json::Value, text: impl FnOnce() -> String) {
    if cli::json_mode() {
        println!("{value}");
    } else {
        println!("{}", text());
    }
}

/// Wall time, or an error explaining that the command needs a synced clock.
fn wall_now(doser: &Doser) -> Result<u32> {
    match doser.now_unix() {
        0 => Err(doser_core::DoserError::State("system clock is not set".into()).into()),
        now => Ok(now),
    }
}

fn dispatch(doser: &Arc<Doser>, cfg: &Config, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Dose { head, ml } => {
            let res = doser
                .try_dispense(head, ml)
                .wrap_err_with(|| format!("dose {ml} mL on head {head}"))?;
            emit(json!({ "head": head, "result": res }), || {
                format!(
                    "dose complete: head {head}, {:.2} mL in {} ms",
                    res.estimated_volume_ml, res.actual_runtime_ms
                )
            });
        }
        Commands::RunFor { head, ms } => {
            let ran = doser
                .run_for_duration(head, ms)
                .wrap_err_with(|| format!("run head {head} for {ms} ms"))?;
            emit(json!({ "head": head, "runtime_ms": ran }), || {
                format!("run complete: head {head}, {ran} ms")
            });
        }
        Commands::Calibrate { head, actual_ml } => {
            let rec = doser.calibrate(head, actual_ml)?;
            emit(json!({ "head": head, "calibration": rec }), || {
                format!(
                    "head {head} calibrated: {:.4} mL/s",
                    rec.ml_per_second
                )
            });
        }
        Commands::Calibration(CalibrationCmd::Show { head }) => {
            let heads: Vec<u8> = match head {
                Some(h) => vec![h],
                None => (0..doser_core::NUM_HEADS as u8).collect(),
            };
            let mut rows = Vec::with_capacity(heads.len());
            for h in heads {
                rows.push((h, doser.calibration(h)?));
            }
            emit(
                json!(
                    rows.iter()
                        .map(|(h, c)| json!({ "head": h, "calibration": c }))
                        .collect::<Vec<_>>()
                ),
                || {
                    rows.iter()
                        .map(|(h, c)| {
                            format!(
                                "head {h}: {:.4} mL/s{}",
                                c.ml_per_second,
                                if c.is_calibrated { "" } else { " (default)" }
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                },
            );
        }
        Commands::Calibration(CalibrationCmd::Reset { head }) => {
            doser.reset_calibration(head)?;
            emit(json!({ "head": head, "reset": true }), || {
                format!("head {head} calibration reset")
            });
        }
        Commands::Schedule(cmd) => schedule_cmd(doser, cmd)?,
        Commands::Logs(cmd) => logs_cmd(doser, cmd)?,
        Commands::Run { duration_s } => run_daemon(doser, cfg, duration_s)?,
        Commands::Estop => {
            doser.emergency_stop_all();
            emit(json!({ "estop": true }), || "emergency stop sent".to_string());
        }
        Commands::SelfCheck => {
            let now = doser.now_unix();
            let status = doser.status(now);
            let logs = doser.log_count()?;
            emit(
                json!({
                    "ok": true,
                    "clock_synced": now != 0,
                    "log_buckets": logs,
                    "heads": status,
                }),
                || {
                    let mut lines = vec![format!(
                        "ok: clock {}, {logs} log buckets",
                        if now == 0 { "unsynced" } else { "synced" }
                    )];
                    lines.extend(status.iter().map(|s| {
                        format!(
                            "head {}: {:.4} mL/s, schedule {:?}",
                            s.head, s.ml_per_second, s.schedule_state
                        )
                    }));
                    lines.join("\n")
                },
            );
        }
    }
    Ok(())
}

fn schedule_cmd(doser: &Doser, cmd: ScheduleCmd) -> Result<()> {
    let saved = match cmd {
        ScheduleCmd::Set {
            head,
            volume_ml,
            interval_s,
            daily_target_ml,
            doses_per_day,
            name,
        } => {
            let s = match (volume_ml, interval_s, daily_target_ml, doses_per_day) {
                (Some(v), Some(i), None, None) => Schedule::interval(head, v, i),
                (None, None, Some(t), Some(n)) => Schedule::from_daily_target(head, t, n)?,
                _ => {
                    return Err(doser_core::DoserError::Validation(
                        "give --volume-ml with --interval-s, or --daily-target-ml with --doses-per-day"
                            .into(),
                    )
                    .into());
                }
            };
            doser.set_schedule(s.with_name(name))?
        }
        ScheduleCmd::Daily {
            head,
            volume_ml,
            at,
            name,
        } => doser.set_schedule(Schedule::daily(head, volume_ml, at).with_name(name))?,
        ScheduleCmd::Once {
            head,
            volume_ml,
            at,
            name,
        } => doser.set_schedule(Schedule::once(head, volume_ml, at).with_name(name))?,
        ScheduleCmd::Get { head } => {
            let s = doser.get_schedule(head)?;
            emit(json!({ "head": head, "schedule": s }), || match &s {
                Some(s) => describe(s),
                None => format!("head {head}: no schedule"),
            });
            return Ok(());
        }
        ScheduleCmd::List => {
            let all = doser.schedules();
            emit(json!(all), || {
                if all.is_empty() {
                    "no enabled schedules".to_string()
                } else {
                    all.iter().map(describe).collect::<Vec<_>>().join("\n")
                }
            });
            return Ok(());
        }
        ScheduleCmd::Delete { head } => {
            let existed = doser.delete_schedule(head)?;
            emit(json!({ "head": head, "deleted": existed }), || {
                if existed {
                    format!("head {head}: schedule disabled")
                } else {
                    format!("head {head}: no schedule")
                }
            });
            return Ok(());
        }
        ScheduleCmd::Clear => {
            doser.clear_schedules()?;
            emit(json!({ "cleared": true }), || "schedules cleared".to_string());
            return Ok(());
        }
    };
    emit(json!(saved), || format!("saved {}", describe(&saved)));
    Ok(())
}

fn describe(s: &Schedule) -> String {
    use doser_core::ScheduleKind;
    let when = match s.kind {
        ScheduleKind::Interval { interval_s } => format!("every {interval_s} s"),
        ScheduleKind::Daily { time_of_day_s } => format!(
            "daily at {:02}:{:02} UTC",
            time_of_day_s / 3600,
            time_of_day_s % 3600 / 60
        ),
        ScheduleKind::Once { at } => format!("once at {at}"),
    };
    let state = if s.enabled { "" } else { " (disabled)" };
    let name = if s.name.is_empty() {
        String::new()
    } else {
        format!(" \"{}\"", s.name)
    };
    format!(
        "head {}{name}: {:.2} mL {when}{state}",
        s.head, s.volume_ml
    )
}

fn logs_cmd(doser: &Doser, cmd: LogsCmd) -> Result<()> {
    match cmd {
        LogsCmd::Hourly { start, end } => {
            let end = match end {
                Some(e) => e,
                None => wall_now(doser)?,
            };
            let start = start.unwrap_or_else(|| end.saturating_sub(24 * 3600));
            let logs = doser.hourly_logs(start, end)?;
            emit(json!(logs), || {
                if logs.is_empty() {
                    "no doses logged in range".to_string()
                } else {
                    logs.iter().map(hourly_line).collect::<Vec<_>>().join("\n")
                }
            });
        }
        LogsCmd::Summary { head } => {
            let now = wall_now(doser)?;
            let summaries = match head {
                Some(h) => vec![doser.daily_summary(h, now)?],
                None => doser.all_daily_summaries(now)?,
            };
            let rows: Vec<_> = summaries
                .iter()
                .map(|s| {
                    json!({
                        "summary": s,
                        "total_today_ml": s.total_today_ml(),
                        "percent_complete": s.percent_complete(),
                    })
                })
                .collect();
            emit(json!(rows), || {
                summaries.iter().map(summary_line).collect::<Vec<_>>().join("\n")
            });
        }
        LogsCmd::Prune => {
            let removed = doser.prune_old_logs(wall_now(doser)?)?;
            emit(json!({ "pruned": removed }), || {
                format!("pruned {removed} log buckets")
            });
        }
        LogsCmd::Clear => {
            doser.clear_logs()?;
            emit(json!({ "cleared": true }), || "logs cleared".to_string());
        }
        LogsCmd::Count => {
            let n = doser.log_count()?;
            emit(json!({ "count": n }), || format!("{n} log buckets"));
        }
    }
    Ok(())
}

fn hourly_line(l: &HourlyDoseLog) -> String {
    format!(
        "{} head {}: scheduled {:.2} mL, ad-hoc {:.2} mL",
        l.hour_timestamp, l.head, l.scheduled_volume_ml, l.adhoc_volume_ml
    )
}

fn summary_line(s: &DailySummary) -> String {
    format!(
        "head {}: {:.2} / {:.2} mL scheduled ({:.0}%), ad-hoc {:.2} mL",
        s.head,
        s.scheduled_actual_ml,
        s.daily_target_ml,
        s.percent_complete(),
        s.adhoc_total_ml
    )
}

fn run_daemon(doser: &Arc<Doser>, cfg: &Config, duration_s: u64) -> Result<()> {
    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .wrap_err("install Ctrl-C handler")?;

    let driver = SchedulerDriver::spawn(doser.clone(), DriverCfg::from(&cfg.scheduler))?;
    tracing::info!(tick_ms = cfg.scheduler.tick_ms, "scheduler running");

    let stopped_by_signal = if duration_s == 0 {
        rx.recv().is_ok()
    } else {
        rx.recv_timeout(Duration::from_secs(duration_s)).is_ok()
    };
    let ticks = driver.tick_count();
    driver.stop();
    tracing::info!(ticks, stopped_by_signal, "scheduler stopped");
    emit(json!({ "ticks": ticks, "interrupted": stopped_by_signal }), || {
        format!("scheduler stopped after {ticks} ticks")
    });
    Ok(())
}

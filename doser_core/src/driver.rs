//! Background scheduler loop.
//!
//! Spawns one thread that runs `Doser::run_due_schedules` every tick and
//! periodically prunes expired logs. Dropping the driver signals the thread
//! and joins it; a dispense in progress finishes first.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel as xch;

use crate::config::DriverCfg;
use crate::doser::Doser;
use crate::error::{DoserError, Result};

pub struct SchedulerDriver {
    shutdown: Option<xch::Sender<()>>,
    ticks: Arc<AtomicU64>,
    join_handle: Option<JoinHandle<()>>,
}

impl SchedulerDriver {
    pub fn spawn(doser: Arc<Doser>, cfg: DriverCfg) -> Result<Self> {
        let (tx, rx) = xch::bounded::<()>(1);
        let ticks = Arc::new(AtomicU64::new(0));
        let ticks_clone = ticks.clone();

        let join_handle = std::thread::Builder::new()
            .name("doser-scheduler".into())
            .spawn(move || {
                tracing::info!(tick_ms = cfg.tick.as_millis() as u64, "scheduler started");
                let mut last_prune: Option<Instant> = None;
                loop {
                    match doser.scheduler_now(cfg.run_before_time_sync) {
                        Some(now) => {
                            let report = doser.run_due_schedules(now);
                            if !report.is_empty() {
                                tracing::info!(
                                    now,
                                    executed = report.executed.len(),
                                    failed = report.failed.len(),
                                    "scheduler tick"
                                );
                            }
                        }
                        None => tracing::trace!("wall time unavailable; tick skipped"),
                    }
                    ticks_clone.fetch_add(1, Ordering::Relaxed);

                    if let Some(every) = cfg.prune_every {
                        let wall = doser.now_unix();
                        let due = last_prune.is_none_or(|t| t.elapsed() >= every);
                        if wall != 0 && due {
                            if let Err(e) = doser.prune_old_logs(wall) {
                                tracing::warn!(error = %e, "log prune failed");
                            }
                            last_prune = Some(Instant::now());
                        }
                    }

                    match rx.recv_timeout(cfg.tick) {
                        Err(xch::RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("scheduler stopped");
            })
            .map_err(|e| DoserError::State(format!("failed to spawn scheduler thread: {e}")))?;

        Ok(Self {
            shutdown: Some(tx),
            ticks,
            join_handle: Some(join_handle),
        })
    }

    /// Completed loop iterations.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for the thread.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("scheduler thread joined"),
                Err(e) => tracing::warn!(?e, "scheduler thread panicked"),
            }
        }
    }
}

impl Drop for SchedulerDriver {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

//! Schedule cache, CRUD, and the due-check/execute pass.
//!
//! The cache mirrors storage: every mutation is persisted first and only then
//! applied to the cache, so a failed write changes nothing. The cache lock is
//! released while a head dispenses and re-taken for bookkeeping.
use std::sync::{Arc, Mutex};

use doser_traits::clock::MIN_VALID_UNIX;
use serde::Serialize;

use crate::NUM_HEADS;
use crate::error::{DoserError, Result};
use crate::head::{DosingHead, DosingResult};
use crate::log_manager::{DosingLogManager, LogOutcome};
use crate::schedule::{Schedule, ScheduleState};
use crate::schedule_store::ScheduleStore;
use crate::util::lock;

#[derive(Default)]
struct Slots {
    cache: [Option<Schedule>; NUM_HEADS],
    executing: [bool; NUM_HEADS],
}

/// A scheduled dose that ran this pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedDose {
    pub head: u8,
    pub target_volume_ml: f32,
    pub estimated_volume_ml: f32,
    pub runtime_ms: u32,
    /// Whether the dose reached the hourly log.
    pub logged: bool,
}

/// A due schedule whose dispense failed; it stays due for the next pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedDose {
    pub head: u8,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub executed: Vec<ExecutedDose>,
    pub failed: Vec<FailedDose>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.failed.is_empty()
    }
}

/// Clears a head's executing flag if the dispense unwinds.
struct ExecutingFlag<'a> {
    slots: &'a Mutex<Slots>,
    idx: usize,
    armed: bool,
}

impl Drop for ExecutingFlag<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.slots).executing[self.idx] = false;
        }
    }
}

pub struct ScheduleManager {
    store: ScheduleStore,
    slots: Mutex<Slots>,
    log: Option<Arc<DosingLogManager>>,
}

fn check_head(head: u8) -> Result<usize, DoserError> {
    let idx = usize::from(head);
    if idx < NUM_HEADS {
        Ok(idx)
    } else {
        Err(DoserError::InvalidHead(head))
    }
}

impl ScheduleManager {
    /// Create the manager and fill the cache from storage.
    pub fn open(store: ScheduleStore) -> Self {
        let mgr = Self {
            store,
            slots: Mutex::new(Slots::default()),
            log: None,
        };
        mgr.reload();
        mgr
    }

    /// Forward successful scheduled doses to `log`.
    pub fn with_log_manager(mut self, log: Arc<DosingLogManager>) -> Self {
        self.log = Some(log);
        self
    }

    /// Replace the cache with what storage holds.
    pub fn reload(&self) {
        let loaded = self.store.load_all();
        let count = loaded.iter().flatten().count();
        lock(&self.slots).cache = loaded;
        tracing::info!(count, "schedules loaded");
    }

    /// Validate, persist and cache a schedule, replacing the head's slot.
    ///
    /// `now` (0 if unknown) stamps `updated_at`, and `created_at` when the
    /// record is new.
    pub fn set_schedule(&self, mut schedule: Schedule, now: u32) -> Result<Schedule> {
        let idx = check_head(schedule.head)?;
        schedule.validate()?;
        let mut slots = lock(&self.slots);
        if schedule.created_at == 0 {
            schedule.created_at = slots.cache[idx]
                .as_ref()
                .map(|s| s.created_at)
                .filter(|t| *t != 0)
                .unwrap_or(now);
        }
        if now != 0 {
            schedule.updated_at = now;
        }
        self.store.save(&schedule)?;
        slots.cache[idx] = Some(schedule.clone());
        tracing::info!(head = schedule.head, kind = ?schedule.kind, volume_ml = schedule.volume_ml, "schedule set");
        Ok(schedule)
    }

    /// The head's cached record, enabled or not.
    pub fn get_schedule(&self, head: u8) -> Result<Option<Schedule>> {
        let idx = check_head(head)?;
        Ok(lock(&self.slots).cache[idx].clone())
    }

    /// Disable the head's schedule, keeping its record and history.
    /// Returns whether there was a schedule to disable.
    pub fn delete_schedule(&self, head: u8, now: u32) -> Result<bool> {
        let idx = check_head(head)?;
        let mut slots = lock(&self.slots);
        let Some(current) = slots.cache[idx].as_ref() else {
            return Ok(false);
        };
        let mut next = current.clone();
        next.enabled = false;
        if now != 0 {
            next.updated_at = now;
        }
        self.store.save(&next)?;
        slots.cache[idx] = Some(next);
        tracing::info!(head, "schedule disabled");
        Ok(true)
    }

    /// Enabled schedules, ordered by head.
    pub fn get_all_schedules(&self) -> Vec<Schedule> {
        lock(&self.slots)
            .cache
            .iter()
            .flatten()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    /// Snapshot of every slot, disabled records included.
    pub fn slots(&self) -> [Option<Schedule>; NUM_HEADS] {
        lock(&self.slots).cache.clone()
    }

    /// Remove every schedule from storage and the cache.
    pub fn clear_all(&self) -> Result<()> {
        let mut slots = lock(&self.slots);
        self.store.clear_all()?;
        slots.cache = Default::default();
        tracing::info!("all schedules cleared");
        Ok(())
    }

    pub fn state(&self, head: u8, now: u32) -> Result<ScheduleState> {
        let idx = check_head(head)?;
        let slots = lock(&self.slots);
        Ok(slots.cache[idx]
            .as_ref()
            .map_or(ScheduleState::Disabled, |s| s.state(now, slots.executing[idx])))
    }

    /// Record an execution at `time` without dispensing.
    pub fn update_last_execution(&self, head: u8, time: u32) -> Result<()> {
        let idx = check_head(head)?;
        let mut slots = lock(&self.slots);
        let Some(current) = slots.cache[idx].as_ref() else {
            return Err(DoserError::State(format!("no schedule on head {head}")).into());
        };
        let mut next = current.clone();
        next.last_execution_time = time;
        next.execution_count = next.execution_count.saturating_add(1);
        next.updated_at = time;
        self.store.save(&next)?;
        slots.cache[idx] = Some(next);
        Ok(())
    }

    /// Move execution stamps taken on the uptime base onto wall time.
    ///
    /// A stamp below `MIN_VALID_UNIX` was recorded while the clock was
    /// unsynced; it becomes `wall_now - (uptime_now - stamp)`. Stamps from an
    /// earlier boot (larger than `uptime_now`) become `wall_now`, restarting the
    /// interval. Returns how many records changed.
    pub fn rebase_uptime_stamps(&self, wall_now: u32, uptime_now: u32) -> usize {
        if wall_now < MIN_VALID_UNIX {
            return 0;
        }
        let mut slots = lock(&self.slots);
        let mut changed = 0;
        for (idx, slot) in slots.cache.iter_mut().enumerate() {
            let Some(current) = slot.as_mut() else { continue };
            let last = current.last_execution_time;
            if last == 0 || last >= MIN_VALID_UNIX {
                continue;
            }
            let mut next = current.clone();
            next.last_execution_time = wall_now.saturating_sub(uptime_now.saturating_sub(last));
            if let Err(e) = self.store.save(&next) {
                tracing::warn!(head = idx, error = %e, "failed to persist rebased execution time");
            }
            tracing::info!(
                head = idx,
                uptime_stamp = last,
                wall_stamp = next.last_execution_time,
                "execution time moved to wall clock"
            );
            *current = next;
            changed += 1;
        }
        changed
    }

    /// Run every due schedule once, heads in order.
    ///
    /// For each head: pick a due schedule under the lock, dispense with the
    /// lock released, then record the execution on whatever record the slot
    /// holds by then. A record deleted or disabled meanwhile is left alone.
    /// Failed dispenses leave the schedule due.
    pub fn check_and_execute(&self, now: u32, heads: &[DosingHead]) -> TickReport {
        let mut report = TickReport::default();
        for idx in 0..NUM_HEADS {
            let picked = {
                let mut slots = lock(&self.slots);
                let due = !slots.executing[idx]
                    && slots.cache[idx]
                        .as_ref()
                        .is_some_and(|s| s.should_execute(now));
                if due {
                    slots.executing[idx] = true;
                    slots.cache[idx].clone()
                } else {
                    None
                }
            };
            let Some(schedule) = picked else { continue };
            let mut flag = ExecutingFlag {
                slots: &self.slots,
                idx,
                armed: true,
            };

            let result = match heads.get(idx) {
                Some(head) => head.dispense(schedule.volume_ml),
                None => DosingResult::failed(schedule.volume_ml, format!("no dosing head {idx}")),
            };

            self.record_execution(idx, now, &result);
            flag.armed = false;

            let head = schedule.head;
            if !result.success {
                report.failed.push(FailedDose {
                    head,
                    error: result.error_message,
                });
                continue;
            }
            let logged = self.forward_to_log(head, result.estimated_volume_ml, now);
            report.executed.push(ExecutedDose {
                head,
                target_volume_ml: result.target_volume_ml,
                estimated_volume_ml: result.estimated_volume_ml,
                runtime_ms: result.actual_runtime_ms,
                logged,
            });
        }
        report
    }

    fn record_execution(&self, idx: usize, now: u32, result: &DosingResult) {
        let mut slots = lock(&self.slots);
        slots.executing[idx] = false;
        if !result.success {
            tracing::warn!(head = idx, error = %result.error_message, "scheduled dose failed; still due");
            return;
        }
        let Some(current) = slots.cache[idx].as_mut().filter(|s| s.enabled) else {
            tracing::info!(head = idx, "schedule removed during dispense; bookkeeping skipped");
            return;
        };
        let mut next = current.clone();
        next.last_execution_time = now;
        next.execution_count = next.execution_count.saturating_add(1);
        next.updated_at = now;
        // The dose already happened; keep the cache advanced even if storage
        // lags so the next pass does not dose again.
        if let Err(e) = self.store.save(&next) {
            tracing::warn!(head = idx, error = %e, "failed to persist execution bookkeeping");
        }
        *current = next;
        tracing::info!(head = idx, count = current.execution_count, "scheduled dose recorded");
    }

    fn forward_to_log(&self, head: u8, volume_ml: f32, now: u32) -> bool {
        let Some(log) = &self.log else { return false };
        match log.log_scheduled_dose(head, volume_ml, now) {
            Ok(LogOutcome::Recorded(_)) => true,
            Ok(LogOutcome::SkippedUnsynced) => false,
            Err(e) => {
                tracing::warn!(head, error = %e, "failed to log scheduled dose");
                false
            }
        }
    }
}

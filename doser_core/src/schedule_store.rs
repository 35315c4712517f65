//! Persistence of one schedule record per head, namespace `schedules`.
use std::sync::Arc;

use doser_traits::Storage;

use crate::NUM_HEADS;
use crate::error::{DoserError, Result};
use crate::schedule::Schedule;
use crate::storage::{decode, encode};

#[derive(Clone)]
pub struct ScheduleStore {
    storage: Arc<dyn Storage>,
}

impl ScheduleStore {
    pub const NAMESPACE: &'static str = "schedules";

    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(head: u8) -> String {
        format!("sched{head}")
    }

    fn check_head(head: u8) -> Result<(), DoserError> {
        if usize::from(head) < NUM_HEADS {
            Ok(())
        } else {
            Err(DoserError::InvalidHead(head))
        }
    }

    /// Validate and persist a schedule under its head's key.
    pub fn save(&self, schedule: &Schedule) -> Result<()> {
        schedule.validate()?;
        let bytes = encode("encode schedule", schedule)?;
        self.storage
            .put(Self::NAMESPACE, &Self::key(schedule.head), &bytes)
            .map_err(|e| DoserError::persistence("write schedule", e))?;
        Ok(())
    }

    pub fn load(&self, head: u8) -> Result<Option<Schedule>> {
        Self::check_head(head)?;
        let bytes = self
            .storage
            .get(Self::NAMESPACE, &Self::key(head))
            .map_err(|e| DoserError::persistence("read schedule", e))?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let schedule: Schedule = decode("decode schedule", &bytes)?;
        if schedule.head != head {
            return Err(DoserError::Persistence(format!(
                "schedule stored under head {head} names head {}",
                schedule.head
            ))
            .into());
        }
        Ok(Some(schedule))
    }

    /// Load every slot. Unreadable or corrupt records are skipped with a warning.
    pub fn load_all(&self) -> [Option<Schedule>; NUM_HEADS] {
        std::array::from_fn(|i| {
            let head = i as u8;
            match self.load(head) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(head, error = %e, "skipping unreadable schedule");
                    None
                }
            }
        })
    }

    pub fn clear_all(&self) -> Result<()> {
        self.storage
            .clear(Self::NAMESPACE)
            .map_err(|e| DoserError::persistence("clear schedules", e))?;
        Ok(())
    }
}

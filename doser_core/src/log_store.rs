//! Hourly dose buckets keyed by (hour, head), namespace `dosinglogs`.
//!
//! Keys are `h<hours since epoch>_<head>`. Saving into an existing bucket adds
//! to it, so a bucket always holds the sum of every dose logged for its hour.
use std::sync::Arc;

use doser_traits::Storage;

use crate::NUM_HEADS;
use crate::config::RetentionCfg;
use crate::dosing_log::HourlyDoseLog;
use crate::error::{DoserError, Result};
use crate::storage::{decode, encode};
use crate::util::{SECS_PER_DAY, SECS_PER_HOUR, floor_to_hour};

pub struct DosingLogStore {
    storage: Arc<dyn Storage>,
    retention: RetentionCfg,
}

impl DosingLogStore {
    pub const NAMESPACE: &'static str = "dosinglogs";

    pub fn new(storage: Arc<dyn Storage>, retention: RetentionCfg) -> Self {
        Self { storage, retention }
    }

    pub fn retention(&self) -> RetentionCfg {
        self.retention
    }

    fn key(hour_timestamp: u32, head: u8) -> String {
        format!("h{}_{}", hour_timestamp / SECS_PER_HOUR, head)
    }

    fn parse_key(key: &str) -> Option<(u32, u8)> {
        let (hours, head) = key.strip_prefix('h')?.split_once('_')?;
        let hour_timestamp = hours.parse::<u32>().ok()?.checked_mul(SECS_PER_HOUR)?;
        Some((hour_timestamp, head.parse().ok()?))
    }

    /// Merge `log` into the stored bucket for its hour and head; returns the
    /// bucket as persisted.
    pub fn save_log(&self, log: &HourlyDoseLog) -> Result<HourlyDoseLog> {
        if !log.is_valid() {
            return Err(DoserError::Validation(format!(
                "invalid hourly log: hour {} head {} volumes {}/{}",
                log.hour_timestamp, log.head, log.scheduled_volume_ml, log.adhoc_volume_ml
            ))
            .into());
        }
        let merged = match self.load_log(log.hour_timestamp, log.head)? {
            Some(existing) => existing.merged(log),
            None => *log,
        };
        let bytes = encode("encode hourly log", &merged)?;
        self.storage
            .put(Self::NAMESPACE, &Self::key(merged.hour_timestamp, merged.head), &bytes)
            .map_err(|e| DoserError::persistence("write hourly log", e))?;
        Ok(merged)
    }

    /// Bucket for the hour containing `timestamp`.
    pub fn load_log(&self, timestamp: u32, head: u8) -> Result<Option<HourlyDoseLog>> {
        let hour = floor_to_hour(timestamp);
        let bytes = self
            .storage
            .get(Self::NAMESPACE, &Self::key(hour, head))
            .map_err(|e| DoserError::persistence("read hourly log", e))?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let log: HourlyDoseLog = decode("decode hourly log", &bytes)?;
        if log.hour_timestamp != hour || log.head != head {
            return Err(DoserError::Persistence(format!(
                "hourly log under hour {hour} head {head} holds hour {} head {}",
                log.hour_timestamp, log.head
            ))
            .into());
        }
        Ok(Some(log))
    }

    /// Widest span a range query scans, in hours.
    fn max_query_hours(&self) -> u32 {
        self.retention
            .retention_hours
            .saturating_add(self.retention.lookback_days.saturating_mul(24))
    }

    /// Buckets for every hour from the one containing `start` through the one
    /// containing `end`, ordered by hour then head.
    ///
    /// The scan never reaches further back than retention plus the prune
    /// lookback before `end`. An earlier `start` is silently moved forward to
    /// that bound, so older buckets that have not been pruned yet are not
    /// returned. Corrupt buckets are skipped.
    pub fn load_logs_in_range(&self, start: u32, end: u32) -> Result<Vec<HourlyDoseLog>> {
        if start > end {
            return Ok(Vec::new());
        }
        let end_hour = floor_to_hour(end);
        let floor = end_hour.saturating_sub(self.max_query_hours().saturating_mul(SECS_PER_HOUR));
        let mut hour = floor_to_hour(start).max(floor);

        let mut out = Vec::new();
        while hour <= end_hour {
            for head in 0..NUM_HEADS as u8 {
                match self.load_log(hour, head) {
                    Ok(Some(log)) => out.push(log),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(hour, head, error = %e, "skipping unreadable hourly log"),
                }
            }
            match hour.checked_add(SECS_PER_HOUR) {
                Some(next) => hour = next,
                None => break,
            }
        }
        Ok(out)
    }

    /// Delete buckets older than the retention window. Returns how many were removed.
    ///
    /// Scans at most `lookback_days` before the cutoff hour.
    pub fn prune_old_logs(&self, now: u32) -> Result<u32> {
        let cutoff = now.saturating_sub(self.retention.retention_hours.saturating_mul(SECS_PER_HOUR));
        let cutoff_hour = floor_to_hour(cutoff);
        let first = cutoff_hour
            .saturating_sub(self.retention.lookback_days.saturating_mul(SECS_PER_DAY));
        let first = floor_to_hour(first);

        let mut removed = 0u32;
        for hour in (first..cutoff_hour).step_by(SECS_PER_HOUR as usize) {
            for head in 0..NUM_HEADS as u8 {
                let existed = self
                    .storage
                    .remove(Self::NAMESPACE, &Self::key(hour, head))
                    .map_err(|e| DoserError::persistence("remove hourly log", e))?;
                if existed {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, cutoff_hour, "pruned hourly logs");
        }
        Ok(removed)
    }

    pub fn clear_all(&self) -> Result<()> {
        self.storage
            .clear(Self::NAMESPACE)
            .map_err(|e| DoserError::persistence("clear hourly logs", e))?;
        Ok(())
    }

    /// Number of stored buckets.
    pub fn log_count(&self) -> Result<usize> {
        let keys = self
            .storage
            .keys(Self::NAMESPACE)
            .map_err(|e| DoserError::persistence("list hourly logs", e))?;
        Ok(keys.iter().filter(|k| Self::parse_key(k).is_some()).count())
    }
}

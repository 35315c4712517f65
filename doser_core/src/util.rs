//! Calendar helpers over unix seconds, plus small sync utilities.
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const SECS_PER_HOUR: u32 = 3_600;
pub const SECS_PER_DAY: u32 = 86_400;

/// Start of the UTC hour containing `ts`.
#[inline]
pub fn floor_to_hour(ts: u32) -> u32 {
    ts - ts % SECS_PER_HOUR
}

/// Start of the UTC day containing `ts`.
#[inline]
pub fn start_of_day(ts: u32) -> u32 {
    ts - ts % SECS_PER_DAY
}

/// Seconds since UTC midnight.
#[inline]
pub fn time_of_day(ts: u32) -> u32 {
    ts % SECS_PER_DAY
}

/// Days since the unix epoch.
#[inline]
pub fn day_index(ts: u32) -> u32 {
    ts / SECS_PER_DAY
}

/// Lock a mutex, recovering the data if a previous holder panicked.
#[inline]
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

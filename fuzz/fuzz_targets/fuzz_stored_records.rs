#![no_main]
use libfuzzer_sys::fuzz_target;

use doser_core::{CalibrationRecord, HourlyDoseLog, Schedule};

// Records read back from the data dir may be truncated or hand-edited.
fuzz_target!(|input: (&str, u32)| {
    let (text, now) = input;
    if let Ok(s) = toml::from_str::<Schedule>(text) {
        let due = s.should_execute(now);
        if s.validate().is_err() {
            assert!(!due);
        }
        let _ = s.next_due(now);
        let _ = s.daily_plan();
    }
    if let Ok(rec) = toml::from_str::<CalibrationRecord>(text) {
        if rec.is_usable() {
            let _ = rec.runtime_ms_for(1.0);
        }
    }
    if let Ok(log) = toml::from_str::<HourlyDoseLog>(text) {
        if log.is_valid() {
            let _ = log.merged(&log).total_ml();
        }
    }
});

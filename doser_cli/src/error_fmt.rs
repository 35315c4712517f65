//! Human-readable error descriptions and structured JSON error formatting.

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use doser_core::error::{BuildError, DoserError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingMotor => {
                "What happened: No motor driver was provided to the doser.\nLikely causes: The TB6612 driver failed to initialize or was not wired into the builder.\nHow to fix: Ensure the motor driver is created successfully and passed via with_motor(...).".to_string()
            }
            BuildError::MissingStorage => {
                "What happened: No storage backend was provided to the doser.\nLikely causes: The data directory could not be opened.\nHow to fix: Check [storage] data_dir in the config and its permissions.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<DoserError>() {
        return match de {
            DoserError::Validation(msg) => format!(
                "What happened: Request rejected ({msg}).\nLikely causes: Volume, runtime or schedule values outside the allowed range.\nHow to fix: Volumes must be 0.1-1000 mL and runs 100-300000 ms; intervals 60-86400 s."
            ),
            DoserError::InvalidHead(h) => format!(
                "What happened: Head {h} does not exist.\nLikely causes: Typo in --head.\nHow to fix: Use a head index from 0 to 3."
            ),
            DoserError::HeadBusy(h) => format!(
                "What happened: Head {h} is already dispensing.\nLikely causes: A scheduled dose or another command is running on the same head.\nHow to fix: Wait for the current run to finish and retry."
            ),
            DoserError::Hardware(msg) | DoserError::HardwareFault(msg) => format!(
                "What happened: Motor driver error ({msg}).\nLikely causes: Wrong TB6612 pins, missing power or insufficient GPIO permissions.\nHow to fix: Check [pins] in the config and the driver wiring, then rerun."
            ),
            DoserError::Persistence(msg) => format!(
                "What happened: Could not read or write stored state ({msg}).\nLikely causes: Data directory missing, read-only or full.\nHow to fix: Check [storage] data_dir and free disk space."
            ),
            DoserError::Config(_) | DoserError::State(_) => format!(
                "What happened: {de}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("gpio") || lower.contains("open motor pins") {
        return "What happened: Failed to initialize GPIO pins.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process has permission to access GPIO.".to_string();
    }

    if lower.contains("invalid configuration")
        || lower.contains("parse config")
        || lower.contains("must be")
    {
        return format!(
            "What happened: Configuration is invalid or incomplete ({msg}).\nLikely causes: Out-of-range values or a TOML syntax error.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error class; anything unclassified returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use doser_core::error::DoserError;
    match err.downcast_ref::<DoserError>() {
        Some(DoserError::Validation(_) | DoserError::InvalidHead(_)) => 3,
        Some(DoserError::HeadBusy(_)) => 4,
        Some(DoserError::Hardware(_) | DoserError::HardwareFault(_)) => 5,
        Some(DoserError::Persistence(_)) => 6,
        _ => 1,
    }
}

/// Short stable name for the JSON `reason` field.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    use doser_core::error::{BuildError, DoserError};
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    match err.downcast_ref::<DoserError>() {
        Some(DoserError::Validation(_)) => "Validation",
        Some(DoserError::InvalidHead(_)) => "InvalidHead",
        Some(DoserError::HeadBusy(_)) => "HeadBusy",
        Some(DoserError::Hardware(_)) => "Hardware",
        Some(DoserError::HardwareFault(_)) => "HardwareFault",
        Some(DoserError::Persistence(_)) => "Persistence",
        Some(DoserError::Config(_)) => "Config",
        Some(DoserError::State(_)) => "State",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use doser_core::error::DoserError;
    use serde_json::json;

    let mut obj = json!({ "reason": reason_name(err), "message": humanize(err) });
    if let Some(DoserError::HeadBusy(h) | DoserError::InvalidHead(h)) =
        err.downcast_ref::<DoserError>()
    {
        obj["details"] = json!({ "head": h });
    }
    obj.to_string()
}

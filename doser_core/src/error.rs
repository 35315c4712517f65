use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DoserError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid head index {0} (must be 0-3)")]
    InvalidHead(u8),
    #[error("head {0} is busy")]
    HeadBusy(u8),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
}

impl DoserError {
    pub(crate) fn persistence(what: &str, e: impl std::fmt::Display) -> Self {
        Self::Persistence(format!("{what}: {e}"))
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing motor driver")]
    MissingMotor,
    #[error("missing storage backend")]
    MissingStorage,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T, E = eyre::Report> = std::result::Result<T, E>;
pub use eyre::Report;

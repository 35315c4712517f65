use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("motor channel {0} out of range")]
    InvalidChannel(u8),
    #[error("motor driver not initialized")]
    NotInitialized,
    #[error("simulated start failure on channel {0}")]
    InjectedFault(u8),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;

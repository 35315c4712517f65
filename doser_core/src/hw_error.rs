//! Maps `Box<dyn Error>` from the motor trait boundary to typed `DoserError`.
//!
//! `doser_traits::MotorDriver` reports failures as `Box<dyn Error + Send + Sync>`;
//! with the `hardware-errors` feature the concrete `doser_hardware::HwError`
//! is recognized and mapped precisely.

use crate::error::DoserError;

/// Map a trait-boundary error to a typed `DoserError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> DoserError {
    #[cfg(feature = "hardware-errors")]
    {
        use doser_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::InvalidChannel(ch) => DoserError::InvalidHead(*ch),
                HwError::Gpio(_) | HwError::NotInitialized => {
                    DoserError::HardwareFault(hw.to_string())
                }
                other => DoserError::Hardware(other.to_string()),
            };
        }
    }

    DoserError::Hardware(e.to_string())
}

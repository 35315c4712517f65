pub mod clock;
pub mod storage;

pub use clock::{Clock, MonotonicClock, SystemWallClock, WallClock};
pub use storage::Storage;

/// Rotation sense of an H-bridge channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

/// Multi-channel DC motor driver (one channel per dosing head).
///
/// Motors run at full speed only. Implementations are shared between the
/// scheduler thread and ad-hoc callers, so every method takes `&self`.
pub trait MotorDriver: Send + Sync {
    fn start(
        &self,
        channel: u8,
        direction: Direction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Coast to a stop.
    fn stop(&self, channel: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Short-brake for a quick stop.
    fn brake(&self, channel: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn is_running(&self, channel: u8) -> bool;
    /// Milliseconds the channel has been running, or the duration of its last
    /// run when stopped.
    fn runtime_ms(&self, channel: u8) -> u32;
    /// Cut power to every channel. Best effort, never fails.
    fn emergency_stop_all(&self);

    fn channel_count(&self) -> u8 {
        4
    }
}

impl<T: MotorDriver + ?Sized> MotorDriver for std::sync::Arc<T> {
    fn start(
        &self,
        channel: u8,
        direction: Direction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).start(channel, direction)
    }
    fn stop(&self, channel: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).stop(channel)
    }
    fn brake(&self, channel: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).brake(channel)
    }
    fn is_running(&self, channel: u8) -> bool {
        (**self).is_running(channel)
    }
    fn runtime_ms(&self, channel: u8) -> u32 {
        (**self).runtime_ms(channel)
    }
    fn emergency_stop_all(&self) {
        (**self).emergency_stop_all()
    }
    fn channel_count(&self) -> u8 {
        (**self).channel_count()
    }
}

//! TB6612FNG dual H-bridge driver (two chips, four channels, shared STBY).
//!
//! Truth table per channel:
//! - forward: IN1=H, IN2=L
//! - reverse: IN1=L, IN2=H
//! - brake:   IN1=H, IN2=H
//! - coast:   IN1=L, IN2=L
//!
//! PWM is held high; there is no speed control.
use std::sync::{Mutex, MutexGuard, PoisonError};

use doser_traits::{Direction, MotorDriver};
use rppal::gpio::{Gpio, OutputPin};

use crate::error::HwError;
use crate::{ChannelState, NUM_CHANNELS, check_channel};

/// BCM pin numbers for one H-bridge channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelPins {
    pub in1: u8,
    pub in2: u8,
    pub pwm: u8,
}

struct Channel {
    in1: OutputPin,
    in2: OutputPin,
    pwm: OutputPin,
    state: ChannelState,
}

impl Channel {
    fn drive(&mut self, in1: bool, in2: bool, pwm: bool) {
        set(&mut self.in1, in1);
        set(&mut self.in2, in2);
        set(&mut self.pwm, pwm);
    }
}

#[inline]
fn set(pin: &mut OutputPin, high: bool) {
    if high {
        pin.set_high();
    } else {
        pin.set_low();
    }
}

struct Inner {
    channels: Vec<Channel>,
    stby: OutputPin,
    standby_enabled: bool,
}

impl Inner {
    fn enable_standby(&mut self) {
        if !self.standby_enabled {
            self.stby.set_high();
            self.standby_enabled = true;
        }
    }
}

pub struct Tb6612Driver {
    inner: Mutex<Inner>,
}

impl Tb6612Driver {
    /// Claim all pins and leave every channel coasting with standby enabled.
    pub fn new(stby_pin: u8, pins: [ChannelPins; NUM_CHANNELS]) -> Result<Self, HwError> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let out = |pin: u8| -> Result<OutputPin, HwError> {
            gpio.get(pin)
                .map(|p| p.into_output_low())
                .map_err(|e| HwError::Gpio(format!("pin {pin}: {e}")))
        };
        let mut channels = Vec::with_capacity(NUM_CHANNELS);
        for p in pins {
            channels.push(Channel {
                in1: out(p.in1)?,
                in2: out(p.in2)?,
                pwm: out(p.pwm)?,
                state: ChannelState::default(),
            });
        }
        let mut inner = Inner {
            channels,
            stby: out(stby_pin)?,
            standby_enabled: false,
        };
        inner.enable_standby();
        tracing::info!(stby_pin, "tb6612 driver ready");
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MotorDriver for Tb6612Driver {
    fn start(
        &self,
        channel: u8,
        direction: Direction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let idx = check_channel(channel)?;
        let mut inner = self.lock();
        inner.enable_standby();
        let ch = &mut inner.channels[idx];
        match direction {
            Direction::Forward => ch.drive(true, false, true),
            Direction::Reverse => ch.drive(false, true, true),
        }
        ch.state.mark_started(direction);
        tracing::debug!(channel, ?direction, "motor start");
        Ok(())
    }

    fn stop(&self, channel: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let idx = check_channel(channel)?;
        let mut inner = self.lock();
        let ch = &mut inner.channels[idx];
        ch.drive(false, false, false);
        ch.state.mark_stopped();
        tracing::debug!(channel, run_ms = ch.state.last_run_ms, "motor stop");
        Ok(())
    }

    fn brake(&self, channel: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let idx = check_channel(channel)?;
        let mut inner = self.lock();
        let ch = &mut inner.channels[idx];
        ch.drive(true, true, true);
        ch.state.mark_stopped();
        Ok(())
    }

    fn is_running(&self, channel: u8) -> bool {
        let idx = usize::from(channel);
        self.lock()
            .channels
            .get(idx)
            .map(|c| c.state.running)
            .unwrap_or(false)
    }

    fn runtime_ms(&self, channel: u8) -> u32 {
        let idx = usize::from(channel);
        self.lock()
            .channels
            .get(idx)
            .map(|c| c.state.runtime_ms())
            .unwrap_or(0)
    }

    fn emergency_stop_all(&self) {
        let mut inner = self.lock();
        for ch in inner.channels.iter_mut() {
            ch.drive(true, true, true);
            ch.state.mark_stopped();
        }
        inner.stby.set_low();
        inner.standby_enabled = false;
        tracing::warn!("emergency stop: all channels braked, standby disabled");
    }

    fn channel_count(&self) -> u8 {
        NUM_CHANNELS as u8
    }
}

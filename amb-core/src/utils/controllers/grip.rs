//! Gripper control for the Arm-Mirror Bot.
//!
//! Drives an auxiliary hand through a PWM channel via `SetDutyCycle` and
//! dispatches commands received over `GRIP_CHANNEL`. The grip value uses the
//! hand hardware's normalized scale: -1.0 fully closed, +1.0 fully open,
//! mapped onto a 0.5-2.5 ms pulse in a 20 ms frame.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::pwm::SetDutyCycle;
use serde::{Deserialize, Serialize};

/// Channel used to receive gripper commands (`GripCommand` messages).
pub static GRIP_CHANNEL: embassy_sync::channel::Channel<CriticalSectionRawMutex, GripCommand, 16> =
    embassy_sync::channel::Channel::new();

/// Pulse width at grip value -1.0, in microseconds.
const MIN_PULSE_US: f32 = 500.0;
/// Pulse width at grip value +1.0, in microseconds.
const MAX_PULSE_US: f32 = 2500.0;
/// PWM frame length in microseconds (50 Hz hobby-servo timing).
const FRAME_US: f32 = 20_000.0;

/// Gripper command variants.
///
/// Serialized as JSON with tag `"gc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(tag = "gc", rename_all = "snake_case")]
pub enum GripCommand {
    /// Fully open the hand.
    Open,
    /// Fully close the hand.
    Close,
    /// Set a grip value in `[-1.0, 1.0]`; out-of-range values are clamped.
    Set { v: f32 },
}

/// High-level gripper controller over a PWM channel.
///
/// Remembers the last commanded grip value.
pub struct GripModule<Pwm> {
    pwm: Pwm,
    value: f32,
}

impl<Pwm: SetDutyCycle> GripModule<Pwm> {
    /// Create a new `GripModule` over the given PWM channel.
    ///
    /// The hand starts at the neutral midpoint.
    pub fn new(pwm: Pwm) -> Self {
        GripModule { pwm, value: 0.0 }
    }

    /// Last commanded grip value.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Execute an incoming `GripCommand`, updating state and the PWM output.
    pub fn ex_command(
        &mut self,
        cmd: GripCommand,
    ) -> Result<(), Pwm::Error> {
        let value = match cmd {
            GripCommand::Open => 1.0,
            GripCommand::Close => -1.0,
            GripCommand::Set { v } => v.clamp(-1.0, 1.0),
        };
        self.value = value;
        self.apply(value)
    }

    /// Translate a grip value into a pulse width and program the channel.
    fn apply(
        &mut self,
        value: f32,
    ) -> Result<(), Pwm::Error> {
        let pulse_us = MIN_PULSE_US + (value + 1.0) * 0.5 * (MAX_PULSE_US - MIN_PULSE_US);
        let max = self.pwm.max_duty_cycle() as f32;
        let duty = (pulse_us / FRAME_US * max) as u16;
        self.pwm.set_duty_cycle(duty)
    }
}

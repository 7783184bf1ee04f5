//! Servo-style PWM ESC backend.
//!
//! 50 Hz frame, 1000–2000 µs pulse. Drive ESCs are bidirectional and idle at
//! 1500 µs; weapon ESCs are unidirectional and idle at 1000 µs.

use crate::comms::{clamp_speed, CommsImplId, EscClass, EscComms, EscHandle, EscId, EscTable};
use crate::config::{ESC_COUNT, RC_PULSE_CENTER_US, RC_PULSE_MAX_US, RC_PULSE_MIN_US, SPEED_MAX};
use crate::error::CommsError;

/// PWM frame period (50 Hz).
pub const PWM_PERIOD_US: u32 = 20_000;

/// One hardware PWM output.
pub trait PulseOutput {
    fn set_period_us(&mut self, period_us: u32) -> Result<(), CommsError>;
    fn set_pulse_us(&mut self, pulse_us: u16) -> Result<(), CommsError>;
}

/// Failsafe (zero-throttle) pulse for `class`.
pub const fn failsafe_pulse_us(class: EscClass) -> u16 {
    match class {
        EscClass::Drive => RC_PULSE_CENTER_US,
        EscClass::Weapon => RC_PULSE_MIN_US,
    }
}

/// Map a per-mille speed onto the pulse envelope of `class`.
pub fn speed_to_pulse_us(class: EscClass, speed: i16) -> u16 {
    let speed = i32::from(clamp_speed(class, speed));
    let max = i32::from(SPEED_MAX);
    let pulse = match class {
        EscClass::Drive => {
            let half_span = i32::from(RC_PULSE_MAX_US - RC_PULSE_CENTER_US);
            i32::from(RC_PULSE_CENTER_US) + speed * half_span / max
        }
        EscClass::Weapon => {
            let span = i32::from(RC_PULSE_MAX_US - RC_PULSE_MIN_US);
            i32::from(RC_PULSE_MIN_US) + speed * span / max
        }
    };
    pulse.clamp(i32::from(RC_PULSE_MIN_US), i32::from(RC_PULSE_MAX_US)) as u16
}

pub struct PwmComms<P> {
    table: EscTable<P>,
}

impl<P: PulseOutput + Send> PwmComms<P> {
    /// Build the backend over its six output lines, indexed by [`EscId`].
    pub fn new(lines: [P; ESC_COUNT]) -> Self {
        Self {
            table: EscTable::new(lines),
        }
    }
}

impl<P: PulseOutput + Send> EscComms for PwmComms<P> {
    fn name(&self) -> &'static str {
        "PWM"
    }

    fn impl_id(&self) -> CommsImplId {
        CommsImplId::Pwm
    }

    fn init_comms(&self) -> Result<(), CommsError> {
        for id in EscId::ALL {
            self.table.with(id, |slot| {
                slot.line.set_period_us(PWM_PERIOD_US)?;
                slot.line.set_pulse_us(failsafe_pulse_us(id.class()))
            })?;
        }
        self.table.mark_ready();
        Ok(())
    }

    fn init_esc(&self, id: EscId) -> Result<EscHandle, CommsError> {
        if !self.table.is_ready() {
            return Err(CommsError::NotInitialised);
        }
        self.table.with(id, |slot| slot.initialised = true);
        Ok(EscHandle::new(id, CommsImplId::Pwm))
    }

    fn set_speed(&self, esc: EscHandle, speed: i16) -> Result<(), CommsError> {
        self.table.check(esc, CommsImplId::Pwm)?;
        let class = esc.class();
        self.table.with(esc.id(), |slot| {
            slot.line.set_pulse_us(speed_to_pulse_us(class, speed))?;
            slot.speed = clamp_speed(class, speed);
            slot.stopped = slot.speed == 0;
            Ok(())
        })
    }

    fn stop(&self, esc: EscHandle) -> Result<(), CommsError> {
        let class = esc.class();
        self.table.with(esc.id(), |slot| {
            slot.speed = 0;
            slot.stopped = true;
            slot.line.set_pulse_us(failsafe_pulse_us(class))
        })
    }
}

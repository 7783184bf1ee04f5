//! RC input publishing.
//!
//! Decoded samples are clamped to the controller's channel limits before they
//! become visible in the controls region.

use embassy_time::Instant;

use crate::config::{RC_NUMBER_CHANNELS, RC_NUMBER_CONTROLLERS, RC_PULSE_MAX_US, RC_PULSE_MIN_US};
use crate::command::{Command, CommandId};
use crate::error::InputError;
use crate::state::{RcChannel, RcControls, SharedState};

/// Accepted pulse range of one channel, µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelLimits {
    pub min: u16,
    pub max: u16,
}

impl ChannelLimits {
    pub const DEFAULT: Self = Self {
        min: RC_PULSE_MIN_US,
        max: RC_PULSE_MAX_US,
    };

    /// Swapped bounds are reordered.
    pub const fn new(min: u16, max: u16) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Monotonic and idempotent.
    #[inline]
    pub fn clamp(&self, raw: u16) -> u16 {
        raw.clamp(self.min, self.max)
    }
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn check_controller(controller: usize) -> Result<(), InputError> {
    if controller < RC_NUMBER_CONTROLLERS {
        Ok(())
    } else {
        Err(InputError::UnknownController(controller))
    }
}

/// Publish one `(controller, channel, raw)` sample. Returns the clamped value.
pub async fn publish_sample(
    state: &SharedState,
    controller: usize,
    channel: RcChannel,
    raw: u16,
    now: Instant,
) -> Result<u16, InputError> {
    check_controller(controller)?;
    let mut region = state.lock_controls().await?;
    let value = region.channel_limits[controller][channel.index()].clamp(raw);
    region.controls[controller].channels[channel.index()] = value;
    let rx = &mut region.receiver[controller];
    rx.raw[channel.index()] = raw;
    rx.last_update = Some(now);
    rx.frames = rx.frames.wrapping_add(1);
    Ok(value)
}

/// Publish a full frame for one controller as a single update.
pub async fn publish_frame(
    state: &SharedState,
    controller: usize,
    raw: &[u16; RC_NUMBER_CHANNELS],
    now: Instant,
) -> Result<RcControls, InputError> {
    check_controller(controller)?;
    let mut region = state.lock_controls().await?;
    let limits = region.channel_limits[controller];
    let mut controls = RcControls::NEUTRAL;
    for (i, value) in controls.channels.iter_mut().enumerate() {
        *value = limits[i].clamp(raw[i]);
    }
    region.controls[controller] = controls;
    let rx = &mut region.receiver[controller];
    rx.raw = *raw;
    rx.last_update = Some(now);
    rx.frames = rx.frames.wrapping_add(1);
    Ok(controls)
}

/// Replace the limits of one channel. The current value is re-clamped so the
/// published controls never sit outside the limits.
pub async fn set_channel_limits(
    state: &SharedState,
    controller: usize,
    channel: RcChannel,
    limits: ChannelLimits,
) -> Result<(), InputError> {
    check_controller(controller)?;
    let mut region = state.lock_controls().await?;
    region.channel_limits[controller][channel.index()] = limits;
    let slot = &mut region.controls[controller].channels[channel.index()];
    *slot = limits.clamp(*slot);
    Ok(())
}

/// CRSF 11-bit channel value to µs (992 ↔ 1500 µs, 0.625 µs per tick).
pub fn crsf_to_us(ticks: u16) -> u16 {
    let us = 1500 + (i32::from(ticks) - 992) * 5 / 8;
    us.clamp(0, i32::from(u16::MAX)) as u16
}

/// Aux switch above this (µs) is "arm".
pub const ARM_SWITCH_HIGH_US: u16 = 1700;
/// Aux switch below this (µs) is "disarm".
pub const ARM_SWITCH_LOW_US: u16 = 1300;

/// Two-position arming switch on the transmitter.
///
/// Edge-triggered: a switch already in the arm position when the link comes
/// up must be cycled through disarm before it arms anything.
#[derive(Debug, Default)]
pub struct ArmSwitch {
    position: Option<bool>,
}

impl ArmSwitch {
    pub const fn new() -> Self {
        Self { position: None }
    }

    pub fn update(&mut self, us: u16) -> Option<Command> {
        let high = if us >= ARM_SWITCH_HIGH_US {
            true
        } else if us <= ARM_SWITCH_LOW_US {
            false
        } else {
            return None;
        };

        let prev = self.position.replace(high);
        match (prev, high) {
            (Some(false), true) => Some(Command::new(CommandId::ArmAll)),
            (Some(true), false) => Some(Command::new(CommandId::DisarmAll)),
            _ => None,
        }
    }
}

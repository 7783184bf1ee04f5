//! Error taxonomy of the control core.
//!
//! Everything here except a hardware fault is locally recoverable: the
//! detecting task counts it in [`crate::state::Counters`] and carries on.

use core::fmt;

use crate::arming::{ArmCommand, ArmingState};

/// Command inbox at capacity; the command was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueFull;

impl fmt::Display for QueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("command queue full")
    }
}

/// ESC communication errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommsError {
    /// Backend does not implement the operation. Callers treat this as "no data".
    Unsupported,
    /// `init_comms` has not completed.
    NotInitialised,
    /// Output line reported a fault.
    Hardware,
}

impl fmt::Display for CommsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => f.write_str("operation unsupported by backend"),
            Self::NotInitialised => f.write_str("comms not initialised"),
            Self::Hardware => f.write_str("ESC hardware fault"),
        }
    }
}

/// Arming state machine rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransitionError {
    /// Command is not valid in the current state.
    InvalidTransition {
        from: ArmingState,
        command: ArmCommand,
    },
    /// A failsafe or hardware latch forbids arming.
    Latched,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, command } => {
                write!(f, "{} not valid in {}", command, from)
            }
            Self::Latched => f.write_str("arming latched off"),
        }
    }
}

/// The control task failed to pet the watchdog in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WatchdogTimeout;

impl fmt::Display for WatchdogTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("control task watchdog expired")
    }
}

/// Lock regions of the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Region {
    Serial,
    Controls,
    Outputs,
    Telemetry,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Serial => "serial",
            Self::Controls => "controls",
            Self::Outputs => "outputs",
            Self::Telemetry => "telemetry",
        })
    }
}

/// Bounded lock acquisition elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LockTimeout(pub Region);

impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timed out acquiring {} lock", self.0)
    }
}

/// Rejected RC input sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputError {
    /// Controller index beyond `RC_NUMBER_CONTROLLERS`.
    UnknownController(usize),
    Lock(LockTimeout),
}

impl From<LockTimeout> for InputError {
    fn from(e: LockTimeout) -> Self {
        Self::Lock(e)
    }
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownController(i) => write!(f, "unknown controller {}", i),
            Self::Lock(e) => write!(f, "{}", e),
        }
    }
}

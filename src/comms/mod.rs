//! ESC communication abstraction.
//!
//! [`EscComms`] is the capability set every backend offers. Exactly one
//! backend is selected at startup and shared as `&'static dyn EscComms`.
//! Methods take `&self`: each ESC sits behind its own blocking mutex inside
//! the backend's [`EscTable`], so the watchdog can call [`EscComms::stop`]
//! without touching any shared-state region.

pub mod dshot;
#[cfg(test)]
pub mod mock;
pub mod pwm;

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::{ESC_COUNT, SPEED_MAX, SPEED_MIN};
use crate::error::CommsError;

pub use dshot::{DshotComms, DshotLine};
pub use pwm::{PulseOutput, PwmComms};

/// Backend identifier carried by every [`EscHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommsImplId {
    Pwm,
    Dshot,
}

impl fmt::Display for CommsImplId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pwm => "PWM",
            Self::Dshot => "DSHOT",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EscClass {
    Drive,
    Weapon,
}

/// Logical ESC output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EscId {
    Drive1 = 0,
    Drive2 = 1,
    Drive3 = 2,
    Weapon1 = 3,
    Weapon2 = 4,
    Weapon3 = 5,
}

impl EscId {
    pub const ALL: [EscId; ESC_COUNT] = [
        Self::Drive1,
        Self::Drive2,
        Self::Drive3,
        Self::Weapon1,
        Self::Weapon2,
        Self::Weapon3,
    ];
    pub const DRIVE: [EscId; 3] = [Self::Drive1, Self::Drive2, Self::Drive3];
    pub const WEAPON: [EscId; 3] = [Self::Weapon1, Self::Weapon2, Self::Weapon3];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn class(self) -> EscClass {
        match self {
            Self::Drive1 | Self::Drive2 | Self::Drive3 => EscClass::Drive,
            Self::Weapon1 | Self::Weapon2 | Self::Weapon3 => EscClass::Weapon,
        }
    }
}

impl fmt::Display for EscId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle to one initialised ESC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EscHandle {
    id: EscId,
    comms: CommsImplId,
}

impl EscHandle {
    pub const fn new(id: EscId, comms: CommsImplId) -> Self {
        Self { id, comms }
    }

    pub const fn id(&self) -> EscId {
        self.id
    }

    pub const fn comms(&self) -> CommsImplId {
        self.comms
    }

    pub const fn class(&self) -> EscClass {
        self.id.class()
    }
}

/// Telemetry a backend may report for one ESC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EscStatus {
    pub speed: i16,
    pub last_frame: u16,
    pub frames_sent: u32,
    pub stopped: bool,
}

/// Capability set of an ESC communication backend.
///
/// `set_speed` is idempotent and cheap enough for the output loop rate.
/// Speeds are per-mille (`-1000..=1000`); backends clamp to their own
/// envelope and never pass raw values through.
pub trait EscComms: Sync {
    fn name(&self) -> &'static str;

    fn impl_id(&self) -> CommsImplId;

    fn init_comms(&self) -> Result<(), CommsError>;

    fn init_esc(&self, id: EscId) -> Result<EscHandle, CommsError>;

    fn set_speed(&self, esc: EscHandle, speed: i16) -> Result<(), CommsError>;

    fn get_speed(&self, _esc: EscHandle) -> Result<i16, CommsError> {
        Err(CommsError::Unsupported)
    }

    fn get_status(&self, _esc: EscHandle) -> Result<EscStatus, CommsError> {
        Err(CommsError::Unsupported)
    }

    /// Failsafe output. Must work from any context, initialised or not.
    fn stop(&self, esc: EscHandle) -> Result<(), CommsError>;
}

/// Clamp a per-mille speed into the envelope of `class`.
///
/// Weapon ESCs are unidirectional, so negative demand becomes zero.
pub fn clamp_speed(class: EscClass, speed: i16) -> i16 {
    match class {
        EscClass::Drive => speed.clamp(SPEED_MIN, SPEED_MAX),
        EscClass::Weapon => speed.clamp(0, SPEED_MAX),
    }
}

/// One ESC output inside a backend.
pub(crate) struct EscSlot<L> {
    pub line: L,
    pub speed: i16,
    pub last_frame: u16,
    pub frames_sent: u32,
    pub stopped: bool,
    pub initialised: bool,
}

/// Backend-owned table of ESC output lines, indexed by [`EscId`].
///
/// Each slot has its own lock, held only for the duration of a single line
/// write.
pub(crate) struct EscTable<L> {
    slots: [Mutex<CriticalSectionRawMutex, RefCell<EscSlot<L>>>; ESC_COUNT],
    ready: AtomicBool,
}

impl<L: Send> EscTable<L> {
    pub fn new(lines: [L; ESC_COUNT]) -> Self {
        Self {
            slots: lines.map(|line| {
                Mutex::new(RefCell::new(EscSlot {
                    line,
                    speed: 0,
                    last_frame: 0,
                    frames_sent: 0,
                    stopped: true,
                    initialised: false,
                }))
            }),
            ready: AtomicBool::new(false),
        }
    }

    pub fn with<R>(&self, id: EscId, f: impl FnOnce(&mut EscSlot<L>) -> R) -> R {
        // EscId discriminants are 0..ESC_COUNT.
        self.slots[id.index()].lock(|slot| f(&mut slot.borrow_mut()))
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Check that `esc` was issued by backend `comms` and is initialised.
    pub fn check(&self, esc: EscHandle, comms: CommsImplId) -> Result<(), CommsError> {
        if esc.comms() != comms || !self.is_ready() {
            return Err(CommsError::NotInitialised);
        }
        if self.with(esc.id(), |slot| slot.initialised) {
            Ok(())
        } else {
            Err(CommsError::NotInitialised)
        }
    }
}

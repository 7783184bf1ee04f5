//! Arming state machine.
//!
//! The machine only decides which subsystems are armed. Keeping actuators at
//! zero is the output stage's job ([`gate`]), which re-checks the state on
//! every write.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::comms::EscClass;
use crate::error::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ArmingState {
    #[default]
    Disarmed = 0,
    DriveOnly = 1,
    WeaponOnly = 2,
    FullyArmed = 3,
}

/// Subsystem addressed by an arm/disarm command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Subsystem {
    Drive,
    Weapon,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmCommand {
    Arm(Subsystem),
    Disarm(Subsystem),
}

impl ArmCommand {
    pub const DISARM_ALL: Self = Self::Disarm(Subsystem::All);

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arm(Subsystem::Drive) => "arm-drive",
            Self::Arm(Subsystem::Weapon) => "arm-weapon",
            Self::Arm(Subsystem::All) => "arm-all",
            Self::Disarm(Subsystem::Drive) => "disarm-drive",
            Self::Disarm(Subsystem::Weapon) => "disarm-weapon",
            Self::Disarm(Subsystem::All) => "disarm-all",
        }
    }
}

impl fmt::Display for ArmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ArmingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disarmed => "DISARMED",
            Self::DriveOnly => "DRIVE_ONLY",
            Self::WeaponOnly => "WEAPON_ONLY",
            Self::FullyArmed => "FULLY_ARMED",
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Disarmed),
            1 => Some(Self::DriveOnly),
            2 => Some(Self::WeaponOnly),
            3 => Some(Self::FullyArmed),
            _ => None,
        }
    }

    pub const fn drive_enabled(self) -> bool {
        matches!(self, Self::DriveOnly | Self::FullyArmed)
    }

    pub const fn weapon_enabled(self) -> bool {
        matches!(self, Self::WeaponOnly | Self::FullyArmed)
    }

    pub const fn is_armed(self) -> bool {
        !matches!(self, Self::Disarmed)
    }

    pub const fn permits(self, class: EscClass) -> bool {
        match class {
            EscClass::Drive => self.drive_enabled(),
            EscClass::Weapon => self.weapon_enabled(),
        }
    }

    /// Next state for `command`, or `InvalidTransition` leaving `self` as is.
    pub fn apply(self, command: ArmCommand) -> Result<Self, TransitionError> {
        use ArmCommand::{Arm, Disarm};
        use ArmingState::*;
        use Subsystem::{All, Drive, Weapon};

        let next = match (self, command) {
            (_, Disarm(All)) => Some(Disarmed),

            (Disarmed, Arm(Drive)) => Some(DriveOnly),
            (Disarmed, Arm(Weapon)) => Some(WeaponOnly),
            (Disarmed, Arm(All)) => Some(FullyArmed),

            (DriveOnly, Arm(Weapon) | Arm(All)) => Some(FullyArmed),
            (DriveOnly, Disarm(Drive)) => Some(Disarmed),

            (WeaponOnly, Arm(Drive) | Arm(All)) => Some(FullyArmed),
            (WeaponOnly, Disarm(Weapon)) => Some(Disarmed),

            (FullyArmed, Disarm(Drive)) => Some(WeaponOnly),
            (FullyArmed, Disarm(Weapon)) => Some(DriveOnly),

            _ => None,
        };

        next.ok_or(TransitionError::InvalidTransition {
            from: self,
            command,
        })
    }
}

impl fmt::Display for ArmingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output-stage clamp: zero unless `state` permits the actuator class.
#[inline]
pub fn gate(state: ArmingState, class: EscClass, speed: i16) -> i16 {
    if state.permits(class) {
        speed
    } else {
        0
    }
}

/// Atomic home of the arming state.
///
/// The control task commits transitions with [`ArmingCell::commit`], which
/// fails if the watchdog forced `Disarmed` in the meantime.
pub struct ArmingCell(AtomicU8);

impl ArmingCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(ArmingState::Disarmed as u8))
    }

    pub fn load(&self) -> ArmingState {
        // Only valid discriminants are ever stored.
        ArmingState::from_u8(self.0.load(Ordering::SeqCst)).unwrap_or(ArmingState::Disarmed)
    }

    /// Swap `from` for `to`. Returns `false` if the state changed under us.
    pub fn commit(&self, from: ArmingState, to: ArmingState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Unconditional move to `Disarmed`; returns the previous state.
    pub fn force_disarm(&self) -> ArmingState {
        let prev = self.0.swap(ArmingState::Disarmed as u8, Ordering::SeqCst);
        ArmingState::from_u8(prev).unwrap_or(ArmingState::Disarmed)
    }
}

impl Default for ArmingCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ArmCommand::{Arm, Disarm};
    use Subsystem::{All, Drive, Weapon};

    const ALL_COMMANDS: [ArmCommand; 6] = [
        Arm(Drive),
        Arm(Weapon),
        Arm(All),
        Disarm(Drive),
        Disarm(Weapon),
        Disarm(All),
    ];

    const ALL_STATES: [ArmingState; 4] = [
        ArmingState::Disarmed,
        ArmingState::DriveOnly,
        ArmingState::WeaponOnly,
        ArmingState::FullyArmed,
    ];

    fn run(commands: &[ArmCommand]) -> ArmingState {
        commands
            .iter()
            .fold(ArmingState::Disarmed, |s, &c| s.apply(c).unwrap_or(s))
    }

    #[test]
    fn test_transition_table() {
        use ArmingState::*;
        assert_eq!(Disarmed.apply(Arm(Drive)), Ok(DriveOnly));
        assert_eq!(Disarmed.apply(Arm(Weapon)), Ok(WeaponOnly));
        assert_eq!(Disarmed.apply(Arm(All)), Ok(FullyArmed));
        assert_eq!(DriveOnly.apply(Arm(Weapon)), Ok(FullyArmed));
        assert_eq!(WeaponOnly.apply(Arm(Drive)), Ok(FullyArmed));
        assert_eq!(FullyArmed.apply(Disarm(Drive)), Ok(WeaponOnly));
        assert_eq!(FullyArmed.apply(Disarm(Weapon)), Ok(DriveOnly));
    }

    #[test]
    fn test_invalid_transitions_leave_state() {
        use ArmingState::*;
        for (state, cmd) in [
            (DriveOnly, Arm(Drive)),
            (WeaponOnly, Arm(Weapon)),
            (FullyArmed, Arm(All)),
            (Disarmed, Disarm(Drive)),
            (DriveOnly, Disarm(Weapon)),
        ] {
            assert_eq!(
                state.apply(cmd),
                Err(TransitionError::InvalidTransition { from: state, command: cmd })
            );
        }
    }

    #[test]
    fn test_disarm_all_from_any_state() {
        for state in ALL_STATES {
            assert_eq!(state.apply(ArmCommand::DISARM_ALL), Ok(ArmingState::Disarmed));
        }
    }

    #[test]
    fn test_scenarios() {
        assert_eq!(run(&[Arm(Drive), Arm(Weapon)]), ArmingState::FullyArmed);
        assert_eq!(run(&[Arm(Weapon), Disarm(Weapon)]), ArmingState::Disarmed);
    }

    #[test]
    fn test_gate_tracks_state_for_every_sequence() {
        // Exhaustive over all sequences of up to four commands.
        let mut seqs: Vec<Vec<ArmCommand>> = Vec::new();
        let mut stack: Vec<Vec<ArmCommand>> = vec![Vec::new()];
        while let Some(seq) = stack.pop() {
            if seq.len() < 4 {
                for c in ALL_COMMANDS {
                    let mut next = seq.clone();
                    next.push(c);
                    stack.push(next);
                }
            }
            seqs.push(seq);
        }
        assert_eq!(seqs.len(), 1 + 6 + 36 + 216 + 1296);

        for seq in &seqs {
            let state = run(seq);
            assert_eq!(gate(state, EscClass::Weapon, 500) != 0, state.weapon_enabled());
            assert_eq!(gate(state, EscClass::Drive, -500) != 0, state.drive_enabled());
        }
    }

    #[test]
    fn test_cell_commit_fails_after_force_disarm() {
        let cell = ArmingCell::new();
        assert!(cell.commit(ArmingState::Disarmed, ArmingState::DriveOnly));
        assert_eq!(cell.force_disarm(), ArmingState::DriveOnly);
        assert!(!cell.commit(ArmingState::DriveOnly, ArmingState::FullyArmed));
        assert_eq!(cell.load(), ArmingState::Disarmed);
    }
}

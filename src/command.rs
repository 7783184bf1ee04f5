//! Command inbox between the input tasks and the control task.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration};

use crate::arming::{ArmCommand, Subsystem};
use crate::config::COMMAND_QUEUE_LEN;
use crate::error::QueueFull;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandId {
    ArmDrive,
    ArmWeapon,
    ArmAll,
    DisarmDrive,
    DisarmWeapon,
    DisarmAll,
    /// Operator acknowledges a watchdog failsafe; does not arm by itself.
    AckFailsafe,
    /// Emergency stop, handled as `DisarmAll`.
    Stop,
    DriveModeSelect,
    WeaponModeSelect,
    /// Enable heading lock at the float payload (degrees).
    HeadingLockSet,
    HeadingLockDisable,
    /// Heading lock rotation speed, int payload in percent.
    HeadingLockSpeed,
    /// Heading lock deadband, int payload in degrees.
    HeadingLockDeadband,
    /// Int payload, see [`crate::state::Orientation::from_code`].
    OrientationOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Payload {
    #[default]
    None,
    Int(i32),
    Float(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command {
    pub id: CommandId,
    pub payload: Payload,
}

impl Command {
    pub const fn new(id: CommandId) -> Self {
        Self {
            id,
            payload: Payload::None,
        }
    }

    pub const fn with_int(id: CommandId, value: i32) -> Self {
        Self {
            id,
            payload: Payload::Int(value),
        }
    }

    pub const fn with_float(id: CommandId, value: f32) -> Self {
        Self {
            id,
            payload: Payload::Float(value),
        }
    }

    /// The arming state machine input carried by this command, if any.
    pub fn arm_command(&self) -> Option<ArmCommand> {
        match self.id {
            CommandId::ArmDrive => Some(ArmCommand::Arm(Subsystem::Drive)),
            CommandId::ArmWeapon => Some(ArmCommand::Arm(Subsystem::Weapon)),
            CommandId::ArmAll => Some(ArmCommand::Arm(Subsystem::All)),
            CommandId::DisarmDrive => Some(ArmCommand::Disarm(Subsystem::Drive)),
            CommandId::DisarmWeapon => Some(ArmCommand::Disarm(Subsystem::Weapon)),
            CommandId::DisarmAll | CommandId::Stop => Some(ArmCommand::DISARM_ALL),
            _ => None,
        }
    }

    pub fn is_disarm_all(&self) -> bool {
        matches!(self.id, CommandId::DisarmAll | CommandId::Stop)
    }

    pub fn int(&self) -> Option<i32> {
        match self.payload {
            Payload::Int(v) => Some(v),
            Payload::Float(v) => Some(v as i32),
            Payload::None => None,
        }
    }

    pub fn float(&self) -> Option<f32> {
        match self.payload {
            Payload::Float(v) => Some(v),
            Payload::Int(v) => Some(v as f32),
            Payload::None => None,
        }
    }

    /// Parse one operator line from the serial link, e.g. `arm weapon`,
    /// `drive-mode 2`, `heading 90.5`, `heading off`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next()?;
        let arg = words.next();
        if words.next().is_some() {
            return None;
        }

        let is = |word: &str, expected: &str| word.eq_ignore_ascii_case(expected);

        let cmd = match (verb, arg) {
            (v, Some(a)) if is(v, "arm") => Self::new(match a {
                a if is(a, "drive") => CommandId::ArmDrive,
                a if is(a, "weapon") => CommandId::ArmWeapon,
                a if is(a, "all") => CommandId::ArmAll,
                _ => return None,
            }),
            (v, Some(a)) if is(v, "disarm") => Self::new(match a {
                a if is(a, "drive") => CommandId::DisarmDrive,
                a if is(a, "weapon") => CommandId::DisarmWeapon,
                a if is(a, "all") => CommandId::DisarmAll,
                _ => return None,
            }),
            (v, None) if is(v, "disarm") => Self::new(CommandId::DisarmAll),
            (v, None) if is(v, "stop") => Self::new(CommandId::Stop),
            (v, None) if is(v, "ack") => Self::new(CommandId::AckFailsafe),
            (v, Some(a)) if is(v, "drive-mode") => {
                Self::with_int(CommandId::DriveModeSelect, a.parse().ok()?)
            }
            (v, Some(a)) if is(v, "weapon-mode") => {
                Self::with_int(CommandId::WeaponModeSelect, a.parse().ok()?)
            }
            (v, Some(a)) if is(v, "heading") && is(a, "off") => {
                Self::new(CommandId::HeadingLockDisable)
            }
            (v, Some(a)) if is(v, "heading") => {
                Self::with_float(CommandId::HeadingLockSet, a.parse().ok()?)
            }
            (v, Some(a)) if is(v, "heading-speed") => {
                Self::with_int(CommandId::HeadingLockSpeed, a.parse().ok()?)
            }
            (v, Some(a)) if is(v, "heading-deadband") => {
                Self::with_int(CommandId::HeadingLockDeadband, a.parse().ok()?)
            }
            (v, Some(a)) if is(v, "orient") => Self::with_int(
                CommandId::OrientationOverride,
                match a {
                    a if is(a, "auto") => 0,
                    a if is(a, "up") => 1,
                    a if is(a, "down") => 2,
                    _ => return None,
                },
            ),
            _ => return None,
        };
        Some(cmd)
    }
}

/// Bounded FIFO of commands. Many producers, one consumer (the control task).
pub struct CommandChannel {
    queue: Channel<CriticalSectionRawMutex, Command, COMMAND_QUEUE_LEN>,
    dropped: AtomicU32,
}

impl CommandChannel {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Never blocks. A full queue drops `cmd` and counts it.
    pub fn enqueue(&self, cmd: Command) -> Result<(), QueueFull> {
        self.queue.try_send(cmd).map_err(|_| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            crate::log_warn!("command queue full, dropped {}", cmd.id);
            QueueFull
        })
    }

    /// Wait up to `timeout` for the next command. `None` means "no command
    /// this cycle".
    pub async fn dequeue(&self, timeout: Duration) -> Option<Command> {
        with_timeout(timeout, self.queue.receive()).await.ok()
    }

    pub fn try_dequeue(&self) -> Option<Command> {
        self.queue.try_receive().ok()
    }

    /// Move everything currently queued into `batch`, oldest first, stopping
    /// when `batch` is full.
    pub fn drain_into<const N: usize>(&self, batch: &mut heapless::Vec<Command, N>) {
        while !batch.is_full() {
            match self.try_dequeue() {
                Some(cmd) => {
                    // Capacity checked above.
                    let _ = batch.push(cmd);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

pub const COMMAND_LINE_LEN: usize = 48;

/// Result of feeding the operator line reader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineEvent {
    Command(Command),
    /// A complete line that is not a command, or one that overflowed.
    Invalid,
}

/// Assembles newline-terminated operator commands from a byte stream.
#[derive(Default)]
pub struct CommandReader {
    line: heapless::String<COMMAND_LINE_LEN>,
    overflow: bool,
}

impl CommandReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> Option<LineEvent> {
        match byte {
            b'\r' | b'\n' => {
                let event = if self.overflow {
                    Some(LineEvent::Invalid)
                } else if self.line.trim().is_empty() {
                    None
                } else {
                    Some(Command::parse(&self.line).map_or(LineEvent::Invalid, LineEvent::Command))
                };
                self.line.clear();
                self.overflow = false;
                event
            }
            b if b.is_ascii() && !b.is_ascii_control() => {
                if self.line.push(char::from(b)).is_err() {
                    self.overflow = true;
                }
                None
            }
            _ => None,
        }
    }
}

impl core::fmt::Display for CommandId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

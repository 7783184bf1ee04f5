//! DShot ESC backend.
//!
//! Drive ESCs run in 3D (bidirectional) mode, weapon ESCs in normal mode.
//! Command value 0 is the DShot motor-stop command and doubles as failsafe.
//! DShot ESCs disarm themselves without a steady frame stream, so the
//! output task is expected to call `set_speed` every cycle.

use crate::comms::{
    clamp_speed, CommsImplId, EscClass, EscComms, EscHandle, EscId, EscStatus, EscTable,
};
use crate::config::ESC_COUNT;
use crate::error::CommsError;

pub const DSHOT_CMD_MOTOR_STOP: u16 = 0;
pub const DSHOT_THROTTLE_MIN: u16 = 48;
pub const DSHOT_THROTTLE_MAX: u16 = 2047;
/// First forward value in 3D mode.
pub const DSHOT_3D_FORWARD_MIN: u16 = 1048;
/// First reverse value in 3D mode (reverse runs down towards 48).
pub const DSHOT_3D_REVERSE_MIN: u16 = 1047;

/// One DShot output line.
pub trait DshotLine {
    fn send_frame(&mut self, frame: u16) -> Result<(), CommsError>;
}

/// 16-bit DShot frame: 11-bit value, telemetry request bit, 4-bit checksum.
pub fn dshot_frame(command: u16, telemetry: bool) -> u16 {
    let mut packet = (command & 0x07ff) << 1;
    if telemetry {
        packet |= 1;
    }

    let mut csum = 0u16;
    let mut csum_data = packet;
    for _ in 0..3 {
        csum ^= csum_data;
        csum_data >>= 4;
    }
    csum &= 0x000f;

    (packet << 4) | csum
}

/// Map a per-mille speed onto a DShot command value for `class`.
pub fn speed_to_dshot(class: EscClass, speed: i16) -> u16 {
    let speed = i32::from(clamp_speed(class, speed));
    if speed == 0 {
        return DSHOT_CMD_MOTOR_STOP;
    }

    let scale = |start: u16, end: u16, magnitude: i32| -> u16 {
        let span = i32::from(end) - i32::from(start);
        (i32::from(start) + magnitude * span / 1000) as u16
    };

    match class {
        EscClass::Weapon => scale(DSHOT_THROTTLE_MIN, DSHOT_THROTTLE_MAX, speed),
        EscClass::Drive if speed > 0 => scale(DSHOT_3D_FORWARD_MIN, DSHOT_THROTTLE_MAX, speed),
        EscClass::Drive => scale(DSHOT_3D_REVERSE_MIN, DSHOT_THROTTLE_MIN, -speed),
    }
}

pub struct DshotComms<L> {
    table: EscTable<L>,
    telemetry: bool,
}

impl<L: DshotLine + Send> DshotComms<L> {
    /// Build the backend over its six output lines, indexed by [`EscId`].
    pub fn new(lines: [L; ESC_COUNT]) -> Self {
        Self {
            table: EscTable::new(lines),
            telemetry: false,
        }
    }

    /// Request ESC telemetry in every frame.
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    fn send(&self, id: EscId, command: u16) -> Result<(), CommsError> {
        let frame = dshot_frame(command, self.telemetry);
        self.table.with(id, |slot| {
            slot.line.send_frame(frame)?;
            slot.last_frame = frame;
            slot.frames_sent = slot.frames_sent.wrapping_add(1);
            Ok(())
        })
    }
}

impl<L: DshotLine + Send> EscComms for DshotComms<L> {
    fn name(&self) -> &'static str {
        "DSHOT300"
    }

    fn impl_id(&self) -> CommsImplId {
        CommsImplId::Dshot
    }

    fn init_comms(&self) -> Result<(), CommsError> {
        for id in EscId::ALL {
            self.send(id, DSHOT_CMD_MOTOR_STOP)?;
        }
        self.table.mark_ready();
        Ok(())
    }

    fn init_esc(&self, id: EscId) -> Result<EscHandle, CommsError> {
        if !self.table.is_ready() {
            return Err(CommsError::NotInitialised);
        }
        self.table.with(id, |slot| slot.initialised = true);
        Ok(EscHandle::new(id, CommsImplId::Dshot))
    }

    fn set_speed(&self, esc: EscHandle, speed: i16) -> Result<(), CommsError> {
        self.table.check(esc, CommsImplId::Dshot)?;
        let class = esc.class();
        self.send(esc.id(), speed_to_dshot(class, speed))?;
        self.table.with(esc.id(), |slot| {
            slot.speed = clamp_speed(class, speed);
            slot.stopped = slot.speed == 0;
        });
        Ok(())
    }

    fn get_speed(&self, esc: EscHandle) -> Result<i16, CommsError> {
        self.table.check(esc, CommsImplId::Dshot)?;
        Ok(self.table.with(esc.id(), |slot| slot.speed))
    }

    fn get_status(&self, esc: EscHandle) -> Result<EscStatus, CommsError> {
        self.table.check(esc, CommsImplId::Dshot)?;
        Ok(self.table.with(esc.id(), |slot| EscStatus {
            speed: slot.speed,
            last_frame: slot.last_frame,
            frames_sent: slot.frames_sent,
            stopped: slot.stopped,
        }))
    }

    fn stop(&self, esc: EscHandle) -> Result<(), CommsError> {
        self.table.with(esc.id(), |slot| {
            slot.speed = 0;
            slot.stopped = true;
        });
        self.send(esc.id(), DSHOT_CMD_MOTOR_STOP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::mock::{MockBus, MockLine};
    use std::sync::Arc;

    fn ready_backend() -> (Arc<MockBus>, DshotComms<MockLine>, [EscHandle; ESC_COUNT]) {
        let bus = MockBus::new();
        let comms = DshotComms::new(bus.lines());
        comms.init_comms().unwrap();
        let handles = EscId::ALL.map(|id| comms.init_esc(id).unwrap());
        (bus, comms, handles)
    }

    #[test]
    fn test_frame_checksum() {
        // Throttle 1046, no telemetry: well-known reference frame.
        assert_eq!(dshot_frame(1046, false), 0x82C6);
        assert_eq!(dshot_frame(0, false), 0x0000);
        assert_eq!(dshot_frame(0, true) & 0x1F, 0x11);
    }

    #[test]
    fn test_speed_mapping() {
        assert_eq!(speed_to_dshot(EscClass::Weapon, 0), DSHOT_CMD_MOTOR_STOP);
        assert_eq!(speed_to_dshot(EscClass::Weapon, 1000), DSHOT_THROTTLE_MAX);
        assert_eq!(speed_to_dshot(EscClass::Weapon, -400), DSHOT_CMD_MOTOR_STOP);
        assert_eq!(speed_to_dshot(EscClass::Drive, 1000), DSHOT_THROTTLE_MAX);
        assert_eq!(speed_to_dshot(EscClass::Drive, -1000), DSHOT_THROTTLE_MIN);
        assert_eq!(speed_to_dshot(EscClass::Drive, 1), DSHOT_3D_FORWARD_MIN);
        assert_eq!(speed_to_dshot(EscClass::Drive, -1), DSHOT_3D_REVERSE_MIN);
    }

    #[test]
    fn test_get_speed_and_status() {
        let (_bus, comms, handles) = ready_backend();
        let esc = handles[EscId::Drive2.index()];
        comms.set_speed(esc, -2500).unwrap();
        assert_eq!(comms.get_speed(esc), Ok(-1000));

        let status = comms.get_status(esc).unwrap();
        assert_eq!(status.speed, -1000);
        assert_eq!(status.last_frame, dshot_frame(DSHOT_THROTTLE_MIN, false));
        assert!(!status.stopped);
        // init_comms frame + set_speed frame
        assert_eq!(status.frames_sent, 2);
    }

    #[test]
    fn test_set_speed_routes_to_addressed_esc_only() {
        let (bus, comms, handles) = ready_backend();
        let before = EscId::ALL.map(|id| bus.writes(id.index()));

        comms.set_speed(handles[EscId::Weapon3.index()], 1000).unwrap();

        for id in EscId::ALL {
            let expected = before[id.index()] + u32::from(id == EscId::Weapon3);
            assert_eq!(bus.writes(id.index()), expected);
        }
        assert_eq!(
            bus.last(EscId::Weapon3.index()),
            u32::from(dshot_frame(DSHOT_THROTTLE_MAX, false))
        );
    }

    #[test]
    fn test_stop_sends_motor_stop() {
        let (bus, comms, handles) = ready_backend();
        let esc = handles[EscId::Weapon1.index()];
        comms.set_speed(esc, 700).unwrap();
        comms.stop(esc).unwrap();

        assert_eq!(bus.last(EscId::Weapon1.index()), u32::from(dshot_frame(0, false)));
        assert!(comms.get_status(esc).unwrap().stopped);
        assert_eq!(comms.get_speed(esc), Ok(0));
    }

    #[test]
    fn test_hardware_fault_surfaces_from_init() {
        let bus = MockBus::new();
        bus.set_failing(true);
        let comms = DshotComms::new(bus.lines());
        assert_eq!(comms.init_comms(), Err(CommsError::Hardware));
        assert_eq!(comms.init_esc(EscId::Drive1), Err(CommsError::NotInitialised));
    }
}

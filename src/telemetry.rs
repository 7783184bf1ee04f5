//! Attitude publishing and the operator status line.

use core::fmt::Write;

use crate::comms::{EscComms, EscHandle};
use crate::error::{CommsError, LockTimeout};
use crate::state::{Counters, Euler, Orientation, OutputsRegion, SharedState, STATUS_LINE_LEN};

pub type StatusLine = heapless::String<STATUS_LINE_LEN>;

/// Operator override if one is set, otherwise what the IMU detected.
pub fn effective_orientation(override_: Orientation, detected: Orientation) -> Orientation {
    match override_ {
        Orientation::Unknown => detected,
        forced => forced,
    }
}

/// Publish one attitude sample from the orientation driver. Returns the
/// resulting `inverted` flag.
pub async fn publish_attitude(
    state: &SharedState,
    euler: Euler,
    detected: Orientation,
) -> Result<bool, LockTimeout> {
    let mut region = state.lock_telemetry().await?;
    region.orientation = euler;
    region.orientation_detected = detected;
    region.inverted =
        effective_orientation(region.orientation_override, detected) == Orientation::Inverted;
    Ok(region.inverted)
}

/// Speed readback of one ESC. `Unsupported` means "no data" and is counted,
/// never surfaced.
pub fn read_esc_speed(state: &SharedState, comms: &dyn EscComms, esc: EscHandle) -> Option<i16> {
    match comms.get_speed(esc) {
        Ok(speed) => Some(speed),
        Err(CommsError::Unsupported) => {
            Counters::bump(&state.counters.unsupported_reads);
            None
        }
        Err(_) => {
            Counters::bump(&state.counters.comms_errors);
            None
        }
    }
}

fn write_list(line: &mut StatusLine, values: impl Iterator<Item = Option<i16>>) -> core::fmt::Result {
    for (i, v) in values.enumerate() {
        if i > 0 {
            line.push(',').map_err(|_| core::fmt::Error)?;
        }
        match v {
            Some(v) => write!(line, "{}", v)?,
            None => line.push('-').map_err(|_| core::fmt::Error)?,
        }
    }
    Ok(())
}

fn render(
    line: &mut StatusLine,
    state: &SharedState,
    comms: &dyn EscComms,
    outputs: &OutputsRegion,
) -> core::fmt::Result {
    let c = &state.counters;
    write!(
        line,
        "[CORE] {} act={} fs={} hw={} seq={} out=",
        state.arming_state(),
        state.is_active() as u8,
        state.failsafe_latched() as u8,
        state.hardware_fault() as u8,
        outputs.sequence,
    )?;
    write_list(line, outputs.speeds.iter().map(|&s| Some(s)))?;
    line.push_str(" esc=").map_err(|_| core::fmt::Error)?;
    write_list(
        line,
        state.escs.iter().map(|esc| read_esc_speed(state, comms, esc)),
    )?;
    write!(
        line,
        " drop={} lock={} wd={} bad={}\r\n",
        state.commands.dropped(),
        Counters::read(&c.lock_timeouts),
        Counters::read(&c.watchdog_trips),
        Counters::read(&c.invalid_transitions).wrapping_add(Counters::read(&c.latched_rejections)),
    )
}

/// Build the status line and leave it in the serial region for the link task.
/// A line that has not been sent yet is replaced.
pub async fn format_status(state: &SharedState, comms: &dyn EscComms) -> Result<usize, LockTimeout> {
    let outputs = *state.lock_outputs().await?;
    let mut line = StatusLine::new();
    if render(&mut line, state, comms, &outputs).is_err() {
        crate::log_debug!("status line truncated");
    }
    let len = line.len();
    state.lock_serial().await?.tx = line;
    Ok(len)
}

/// Take the pending status line, leaving the serial region empty.
pub async fn take_status(state: &SharedState) -> Result<StatusLine, LockTimeout> {
    let mut serial = state.lock_serial().await?;
    Ok(core::mem::take(&mut serial.tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::mock::MockBus;
    use crate::comms::{CommsImplId, DshotComms, EscId, PwmComms};
    use crate::config::CoreConfig;
    use embassy_futures::block_on;

    #[test]
    fn test_override_wins_over_detection() {
        use Orientation::*;
        assert_eq!(effective_orientation(Unknown, Inverted), Inverted);
        assert_eq!(effective_orientation(Upright, Inverted), Upright);
        assert_eq!(effective_orientation(Inverted, Upright), Inverted);
        assert_eq!(effective_orientation(Unknown, Unknown), Unknown);
    }

    #[test]
    fn test_publish_attitude_derives_inverted() {
        let s = SharedState::new(CoreConfig::default(), CommsImplId::Pwm);
        let euler = Euler {
            roll: 180.0,
            pitch: 0.0,
            yaw: 12.0,
        };
        assert!(block_on(publish_attitude(&s, euler, Orientation::Inverted)).unwrap());

        block_on(s.lock_telemetry()).unwrap().orientation_override = Orientation::Upright;
        assert!(!block_on(publish_attitude(&s, euler, Orientation::Inverted)).unwrap());
        assert_eq!(block_on(s.lock_telemetry()).unwrap().orientation.yaw, 12.0);
    }

    #[test]
    fn test_status_line_with_unsupported_readback() {
        let s = SharedState::new(CoreConfig::default(), CommsImplId::Pwm);
        let bus = MockBus::new();
        let comms = PwmComms::new(bus.lines());

        let len = block_on(format_status(&s, &comms)).unwrap();
        assert!(len > 0);
        assert_eq!(Counters::read(&s.counters.unsupported_reads), 6);
        assert_eq!(Counters::read(&s.counters.comms_errors), 0);

        let line = block_on(take_status(&s)).unwrap();
        assert!(line.starts_with("[CORE] DISARMED act=0"));
        assert!(line.contains("out=0,0,0,0,0,0 esc=-,-,-,-,-,-"));
        assert!(line.ends_with("\r\n"));
        assert!(block_on(take_status(&s)).unwrap().is_empty());
    }

    #[test]
    fn test_rejection_total_wraps() {
        use core::sync::atomic::Ordering;

        let s = SharedState::new(CoreConfig::default(), CommsImplId::Pwm);
        let bus = MockBus::new();
        let comms = PwmComms::new(bus.lines());
        s.counters.invalid_transitions.store(u32::MAX, Ordering::Relaxed);
        s.counters.latched_rejections.store(2, Ordering::Relaxed);

        block_on(format_status(&s, &comms)).unwrap();
        let line = block_on(take_status(&s)).unwrap();
        assert!(line.ends_with(" bad=1\r\n"), "{}", line);
    }

    #[test]
    fn test_status_line_with_dshot_readback() {
        let s = SharedState::new(CoreConfig::default(), CommsImplId::Dshot);
        let bus = MockBus::new();
        let comms = DshotComms::new(bus.lines());
        comms.init_comms().unwrap();
        for id in EscId::ALL {
            comms.init_esc(id).unwrap();
        }
        comms.set_speed(s.escs.get(EscId::Drive2), -250).unwrap();

        block_on(format_status(&s, &comms)).unwrap();
        let line = block_on(take_status(&s)).unwrap();
        assert!(line.contains("esc=0,-250,0,0,0,0"));
        assert_eq!(Counters::read(&s.counters.unsupported_reads), 0);
    }
}

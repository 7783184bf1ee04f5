//! Hardware bring-up of the selected ESC backend.

use embassy_time::Instant;

use crate::arming::ArmingState;
use crate::comms::EscComms;
use crate::error::CommsError;
use crate::state::{Counters, SharedState, StatusLeds};

/// Initialise the backend and every ESC, then start the watchdog.
///
/// Any failure latches a hardware fault: the system stays `Disarmed` for the
/// rest of its life and every ESC is sent a best-effort stop.
pub fn bring_up(state: &SharedState, comms: &dyn EscComms, now: Instant) -> Result<(), CommsError> {
    if comms.impl_id() != state.escs.drive[0].comms() {
        crate::log_error!("ESC bank not built for {} backend", comms.impl_id());
        return fault(state, comms, CommsError::NotInitialised);
    }

    if let Err(e) = comms.init_comms() {
        crate::log_error!("{} init failed: {}", comms.name(), e);
        return fault(state, comms, e);
    }

    for esc in state.escs.iter() {
        match comms.init_esc(esc.id()) {
            Ok(handle) if handle == esc => {}
            Ok(_) => return fault(state, comms, CommsError::NotInitialised),
            Err(e) => {
                crate::log_error!("ESC {} init failed: {}", esc.id(), e);
                return fault(state, comms, e);
            }
        }
    }

    state.watchdog.start(now);
    state
        .leds
        .show(StatusLeds::code_for(ArmingState::Disarmed, false));
    crate::log_info!("{} backend up, {} ESCs", comms.name(), state.escs.iter().count());
    Ok(())
}

fn fault(state: &SharedState, comms: &dyn EscComms, e: CommsError) -> Result<(), CommsError> {
    state.latch_hardware_fault();
    for esc in state.escs.iter() {
        if comms.stop(esc).is_err() {
            Counters::bump(&state.counters.comms_errors);
        }
    }
    Err(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::mock::MockBus;
    use crate::comms::{CommsImplId, DshotComms, PwmComms};
    use crate::config::CoreConfig;

    #[test]
    fn test_bring_up_starts_watchdog() {
        let s = SharedState::new(CoreConfig::default(), CommsImplId::Dshot);
        let bus = MockBus::new();
        let comms = DshotComms::new(bus.lines());
        bring_up(&s, &comms, Instant::from_millis(0)).unwrap();
        assert!(!s.hardware_fault());
        assert_eq!(s.leds.code(), StatusLeds::ALIVE);
        assert!(s.watchdog.expired(Instant::from_secs(1)));
    }

    #[test]
    fn test_line_fault_latches_hardware_fault() {
        let s = SharedState::new(CoreConfig::default(), CommsImplId::Pwm);
        let bus = MockBus::new();
        bus.set_failing(true);
        let comms = PwmComms::new(bus.lines());
        assert_eq!(
            bring_up(&s, &comms, Instant::from_millis(0)),
            Err(CommsError::Hardware)
        );
        assert!(s.hardware_fault());
        assert_eq!(s.arming_state(), ArmingState::Disarmed);
    }

    #[test]
    fn test_mismatched_bank_is_rejected() {
        let s = SharedState::new(CoreConfig::default(), CommsImplId::Dshot);
        let bus = MockBus::new();
        let comms = PwmComms::new(bus.lines());
        assert_eq!(
            bring_up(&s, &comms, Instant::from_millis(0)),
            Err(CommsError::NotInitialised)
        );
        assert!(s.hardware_fault());
    }
}

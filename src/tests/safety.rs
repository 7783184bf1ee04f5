use embassy_futures::block_on;
use embassy_time::{with_timeout, Duration, Instant};

use super::*;
use crate::arming::ArmingState;
use crate::command::{Command, CommandId};
use crate::comms::dshot::dshot_frame;
use crate::comms::{EscId, EscComms};
use crate::control::{ControlLoop, DirectMix};
use crate::error::WatchdogTimeout;
use crate::input::publish_frame;
use crate::output::OutputStage;
use crate::state::{Counters, StatusLeds};

const FRAME: [u16; 6] = [2000, 1500, 1800, 1500, 1500, 1500];

fn writes(bus: &MockBus) -> [u32; 6] {
    core::array::from_fn(|i| bus.writes(i))
}

fn arm_all(s: &SharedState, comms: &dyn EscComms, now: Instant) {
    block_on(publish_frame(s, 0, &FRAME, now)).unwrap();
    s.commands.enqueue(Command::new(CommandId::ArmAll)).unwrap();
    block_on(ControlLoop::new(s, DirectMix).step(now)).unwrap();
    block_on(OutputStage::new(s, comms).step()).unwrap();
    assert_eq!(s.arming_state(), ArmingState::FullyArmed);
}

#[test]
fn test_watchdog_stops_everything_while_stalled_task_holds_locks() {
    let (s, bus, comms) = dshot_rig();
    let t0 = Instant::now();
    arm_all(&s, &comms, t0);
    let before = writes(&bus);

    // Control task stalls holding both of its regions.
    let outputs = block_on(s.lock_outputs()).unwrap();
    let controls = block_on(s.lock_controls()).unwrap();

    assert!(s.watchdog.poll(t0 + Duration::from_millis(10), &s, &comms).is_ok());
    assert_eq!(
        s.watchdog.poll(t0 + Duration::from_millis(60), &s, &comms),
        Err(WatchdogTimeout)
    );

    assert_eq!(s.arming_state(), ArmingState::Disarmed);
    assert!(!s.is_active());
    assert!(s.failsafe_latched());
    assert_eq!(Counters::read(&s.counters.watchdog_trips), 1);
    assert_eq!(s.leds.code() & StatusLeds::FAULT, StatusLeds::FAULT);
    for id in EscId::ALL {
        let i = id.index();
        assert_eq!(bus.writes(i), before[i] + 1, "{} not stopped", id);
        assert_eq!(bus.last(i), u32::from(dshot_frame(0, false)));
    }

    // Same stall, no second stop burst.
    assert!(s.watchdog.poll(t0 + Duration::from_millis(80), &s, &comms).is_err());
    assert_eq!(Counters::read(&s.counters.watchdog_trips), 1);

    drop(controls);
    drop(outputs);

    // Recovery: arming stays latched off until the operator acknowledges.
    let mut ctl = ControlLoop::new(&s, DirectMix);
    let t1 = t0 + Duration::from_millis(100);
    block_on(publish_frame(&s, 0, &FRAME, t1)).unwrap();
    s.commands.enqueue(Command::new(CommandId::ArmAll)).unwrap();
    block_on(ctl.step(t1)).unwrap();
    assert_eq!(s.arming_state(), ArmingState::Disarmed);
    assert_eq!(Counters::read(&s.counters.latched_rejections), 1);
    assert!(!s.watchdog.is_tripped());

    s.commands.enqueue(Command::new(CommandId::AckFailsafe)).unwrap();
    s.commands.enqueue(Command::new(CommandId::ArmAll)).unwrap();
    block_on(ctl.step(t1)).unwrap();
    assert_eq!(s.arming_state(), ArmingState::FullyArmed);
    assert!(!s.failsafe_latched());
}

#[test]
fn test_watchdog_task_fires_in_real_time() {
    let (s, bus, comms) = dshot_rig();
    arm_all(&s, &comms, Instant::now());
    let before = writes(&bus);

    let _stalled = block_on(s.lock_outputs()).unwrap();
    let result = block_on(with_timeout(
        Duration::from_millis(300),
        s.watchdog.run(&s, &comms),
    ));

    assert!(result.is_err());
    assert_eq!(s.arming_state(), ArmingState::Disarmed);
    assert_eq!(Counters::read(&s.counters.watchdog_trips), 1);
    let after = writes(&bus);
    for i in 0..6 {
        assert_eq!(after[i], before[i] + 1);
    }
}

#[test]
fn test_watchdog_fires_while_control_context_never_yields() {
    let (s, bus, comms) = dshot_rig();
    arm_all(&s, &comms, Instant::now());

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let _ = block_on(with_timeout(
                Duration::from_millis(300),
                s.watchdog.run(&s, &comms),
            ));
        });

        // Control context busy without ever awaiting.
        std::thread::sleep(std::time::Duration::from_millis(250));
        assert_eq!(s.arming_state(), ArmingState::Disarmed);
        assert!(!s.is_active());
    });

    assert_eq!(Counters::read(&s.counters.watchdog_trips), 1);
    for id in EscId::ALL {
        assert_eq!(bus.last(id.index()), u32::from(dshot_frame(0, false)));
    }
}

#[test]
fn test_output_stage_writes_zero_after_trip_even_with_stale_outputs() {
    let (s, bus, comms) = pwm_rig();
    let t0 = Instant::now();
    arm_all(&s, &comms, t0);
    assert_eq!(bus.last(EscId::Weapon1.index()), 1800);

    s.watchdog.poll(t0 + Duration::from_secs(1), &s, &comms).unwrap_err();
    // Outputs region still holds the armed speeds.
    assert_ne!(block_on(s.lock_outputs()).unwrap().speeds, [0; 6]);

    block_on(OutputStage::new(&s, &comms).step()).unwrap();
    for id in EscId::DRIVE {
        assert_eq!(bus.last(id.index()), 1500);
    }
    for id in EscId::WEAPON {
        assert_eq!(bus.last(id.index()), 1000);
    }
}

#[test]
fn test_hardware_fault_pins_system_disarmed() {
    let s = SharedState::new(test_config(), CommsImplId::Pwm);
    let bus = MockBus::new();
    bus.set_failing(true);
    let comms = PwmComms::new(bus.lines());
    assert!(bring_up(&s, &comms, Instant::now()).is_err());
    bus.set_failing(false);

    let now = Instant::now();
    block_on(publish_frame(&s, 0, &FRAME, now)).unwrap();
    for id in [CommandId::ArmAll, CommandId::AckFailsafe, CommandId::ArmDrive] {
        s.commands.enqueue(Command::new(id)).unwrap();
    }
    block_on(ControlLoop::new(&s, DirectMix).step(now)).unwrap();
    block_on(OutputStage::new(&s, &comms).step()).unwrap();

    assert_eq!(s.arming_state(), ArmingState::Disarmed);
    assert!(s.hardware_fault());
    assert_eq!(Counters::read(&s.counters.latched_rejections), 2);
    assert_eq!(block_on(s.lock_outputs()).unwrap().speeds, [0; 6]);
    assert_eq!(writes(&bus), [0; 6]);
}

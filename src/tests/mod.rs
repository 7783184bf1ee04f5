//! End-to-end scenarios across input, control, output and watchdog.

mod safety;

use std::sync::Arc;

use embassy_time::{Duration, Instant};

use crate::comms::mock::{MockBus, MockLine};
use crate::comms::{CommsImplId, DshotComms, PwmComms};
use crate::config::CoreConfig;
use crate::startup::bring_up;
use crate::state::SharedState;

fn test_config() -> CoreConfig {
    CoreConfig {
        dequeue_timeout: Duration::from_millis(1),
        lock_timeout: Duration::from_millis(5),
        watchdog_timeout: Duration::from_millis(50),
        watchdog_poll: Duration::from_millis(5),
        ..CoreConfig::default()
    }
}

fn pwm_rig() -> (SharedState, Arc<MockBus>, PwmComms<MockLine>) {
    let state = SharedState::new(test_config(), CommsImplId::Pwm);
    let bus = MockBus::new();
    let comms = PwmComms::new(bus.lines());
    bring_up(&state, &comms, Instant::now()).unwrap();
    (state, bus, comms)
}

fn dshot_rig() -> (SharedState, Arc<MockBus>, DshotComms<MockLine>) {
    let state = SharedState::new(test_config(), CommsImplId::Dshot);
    let bus = MockBus::new();
    let comms = DshotComms::new(bus.lines());
    bring_up(&state, &comms, Instant::now()).unwrap();
    (state, bus, comms)
}

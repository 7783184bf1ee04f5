use embassy_executor::task;

use combat_controller::comms::EscComms;
use combat_controller::control::{ControlLoop, DirectMix};
use combat_controller::output::OutputStage;
use combat_controller::state::SharedState;

/// Commands, ASM and control law at `CoreConfig::control_period`.
#[task]
pub async fn control_task(state: &'static SharedState) {
    ControlLoop::new(state, DirectMix).run().await
}

/// ESC writes at `CoreConfig::output_period`.
#[task]
pub async fn output_task(state: &'static SharedState, comms: &'static dyn EscComms) {
    OutputStage::new(state, comms).run().await
}

#[task]
pub async fn watchdog_task(state: &'static SharedState, comms: &'static dyn EscComms) {
    state.watchdog.run(state, comms).await
}

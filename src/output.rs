//! Output task: published speeds to the ESC backend.

use embassy_time::Ticker;

use crate::arming::gate;
use crate::comms::EscComms;
use crate::error::LockTimeout;
use crate::state::{Counters, SharedState};

pub struct OutputStage<'a> {
    state: &'a SharedState,
    comms: &'a dyn EscComms,
    last_sequence: Option<u32>,
}

impl<'a> OutputStage<'a> {
    pub fn new(state: &'a SharedState, comms: &'a dyn EscComms) -> Self {
        Self {
            state,
            comms,
            last_sequence: None,
        }
    }

    /// Copy the outputs region, re-gate every speed against the current
    /// arming state and write it to its own ESC.
    pub async fn step(&mut self) -> Result<(), LockTimeout> {
        let state = self.state;
        let outputs = *state.lock_outputs().await?;

        if state.hardware_fault() {
            return Ok(());
        }

        if self.last_sequence != Some(outputs.sequence) {
            crate::log_debug!("outputs seq {}", outputs.sequence);
            self.last_sequence = Some(outputs.sequence);
        }

        // Re-read after the copy; the watchdog may have disarmed meanwhile.
        let arming = state.arming_state();
        for esc in state.escs.iter() {
            let speed = gate(arming, esc.class(), outputs.speed(esc.id()));
            if let Err(e) = self.comms.set_speed(esc, speed) {
                Counters::bump(&state.counters.comms_errors);
                crate::log_warn!("{} {}: {}", self.comms.name(), esc.id(), e);
            }
        }
        Ok(())
    }

    pub async fn run(&mut self) -> ! {
        let mut ticker = Ticker::every(self.state.config.output_period);
        loop {
            if let Err(e) = self.step().await {
                crate::log_warn!("output cycle skipped: {}", e);
            }
            ticker.next().await;
        }
    }
}

use embassy_executor::task;
use embassy_stm32::peripherals::{DMA1_CH2, UART4};
use embassy_stm32::usart::UartRx;
use embassy_time::Instant;

use combat_controller::drivers::crsf::CrsfParser;
use combat_controller::input::{publish_frame, ArmSwitch};
use combat_controller::state::{RcChannel, SharedState};

/// Controller slot fed by the CRSF receiver.
const CRSF_CONTROLLER: usize = 0;

/// CRSF/ELRS receiver on UART4. Publishes every decoded frame into the
/// controls region and turns the Aux1 switch into arm/disarm commands.
#[task]
pub async fn crsf_task(mut crsf_rx: UartRx<'static, UART4, DMA1_CH2>, state: &'static SharedState) {
    let mut parser = CrsfParser::new();
    let mut arm_switch = ArmSwitch::new();
    let mut buf = [0u8; 64];

    loop {
        let n = match crsf_rx.read_until_idle(&mut buf).await {
            Ok(n) => n,
            Err(_) => continue,
        };
        let Some(rc) = parser.push_bytes(&buf[..n]) else {
            continue;
        };

        match publish_frame(state, CRSF_CONTROLLER, &rc.to_controls(), Instant::now()).await {
            Ok(controls) => {
                if let Some(cmd) = arm_switch.update(controls.get(RcChannel::Aux1)) {
                    // A full queue is counted by the channel.
                    let _ = state.commands.enqueue(cmd);
                }
            }
            Err(e) => defmt::warn!("rc frame dropped: {}", e),
        }
    }
}

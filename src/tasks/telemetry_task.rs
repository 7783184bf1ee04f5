use embassy_executor::task;
use embassy_time::{with_timeout, Duration, Ticker};

use combat_controller::command::{CommandReader, LineEvent};
use combat_controller::comms::EscComms;
use combat_controller::state::SharedState;
use combat_controller::telemetry::{format_status, take_status};

use crate::usb::UsbSerial;

const MAX_PACKET: usize = 64;

/// Operator link over USB CDC-ACM, 10 Hz.
/// Sends the status line and reads newline-terminated commands.
#[task]
pub async fn telemetry_task(
    mut usb_serial: UsbSerial<'static>,
    state: &'static SharedState,
    comms: &'static dyn EscComms,
) {
    let mut reader = CommandReader::new();
    let mut rx = [0u8; MAX_PACKET];
    let mut ticker = Ticker::every(Duration::from_hz(10));

    loop {
        ticker.next().await;
        if !usb_serial.dtr() {
            continue;
        }

        // ── Status out ───────────────────────────────────────────────────────
        if format_status(state, comms).await.is_ok() {
            if let Ok(line) = take_status(state).await {
                for chunk in line.as_bytes().chunks(MAX_PACKET) {
                    let _ = usb_serial.write_packet(chunk).await;
                }
                if line.len() % MAX_PACKET == 0 {
                    let _ = usb_serial.write_packet(&[]).await;
                }
            }
        }

        // ── Commands in ──────────────────────────────────────────────────────
        let Ok(Ok(n)) = with_timeout(Duration::from_millis(5), usb_serial.read_packet(&mut rx)).await
        else {
            continue;
        };
        for &b in &rx[..n] {
            let reply: &[u8] = match reader.push(b) {
                Some(LineEvent::Command(cmd)) => match state.commands.enqueue(cmd) {
                    Ok(()) => b"ok\r\n",
                    Err(_) => b"busy\r\n",
                },
                Some(LineEvent::Invalid) => b"?\r\n",
                None => continue,
            };
            let _ = usb_serial.write_packet(reply).await;
        }
    }
}

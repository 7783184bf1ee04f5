use embassy_executor::task;
use embassy_stm32::peripherals::SPI1;
use embassy_time::{Duration, Instant, Ticker, Timer};

use combat_controller::attitude::{AttitudeEstimator, BiasEstimator, ImuSample};
use combat_controller::drivers::icm42688::Icm42688;
use combat_controller::state::SharedState;
use combat_controller::telemetry::publish_attitude;

const IMU_HZ: u64 = 200;
/// 100 samples × 10 ms.
const CALIB_SAMPLES: u32 = 100;

/// Orientation driver. Without a working IMU the orientation stays
/// `Unknown` and only the operator override can flip the drive.
#[task]
pub async fn imu_task(mut imu: Icm42688<'static, SPI1>, state: &'static SharedState) {
    match imu.init().await {
        Ok(true) => {}
        Ok(false) => defmt::warn!("IMU: unexpected WHO_AM_I"),
        Err(_) => {
            defmt::error!("IMU: init failed, orientation unavailable");
            return;
        }
    }

    // Robot must sit still and upright during calibration.
    let mut bias = BiasEstimator::default();
    while bias.samples() < CALIB_SAMPLES {
        if let Ok((accel, gyro)) = imu.read_motion() {
            bias.push(accel, gyro);
        }
        Timer::after(Duration::from_millis(10)).await;
    }
    let bias = bias.finish();
    defmt::info!("IMU: calibrated");

    let mut estimator = AttitudeEstimator::new();
    let mut ticker = Ticker::every(Duration::from_hz(IMU_HZ));
    let mut last = Instant::now();

    loop {
        ticker.next().await;

        let now = Instant::now();
        let dt = ((now - last).as_micros() as f32 / 1_000_000.0).clamp(0.001, 0.02);
        last = now;

        let Ok((accel, gyro)) = imu.read_motion() else {
            continue;
        };
        let (euler, detected) = estimator.update(&ImuSample::from_raw(accel, gyro, &bias), dt);
        // Lock timeouts are counted in the shared state; next sample retries.
        let _ = publish_attitude(state, euler, detected).await;
    }
}

//! Orientation estimate for a robot that can drive on either face.
//!
//! Complementary filter: gyro integration corrected towards the accelerometer
//! tilt every sample. The upright/inverted decision uses the gravity axis with
//! hysteresis so a robot balanced on its side keeps its last orientation.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::control::{heading_error, wrap_heading};
use crate::state::{Euler, Orientation};

// ── Sensor scaling ────────────────────────────────────────────────────────────

/// ±16 g range.
pub const ACCEL_LSB_PER_G: f32 = 2048.0;
/// ±2000 dps range.
pub const GYRO_LSB_PER_DPS: f32 = 16.4;

/// Gravity on the z axis below this (g) means inverted.
const FLIP_ENTER_G: f32 = -0.5;
/// Gravity on the z axis above this (g) means upright.
const FLIP_EXIT_G: f32 = 0.5;
/// Weight of the accelerometer tilt per sample.
const ACCEL_TRUST: f32 = 0.02;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuBias {
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
}

/// Averages raw samples taken while the robot sits still and upright.
#[derive(Debug, Default)]
pub struct BiasEstimator {
    accel: [f32; 3],
    gyro: [f32; 3],
    samples: u32,
}

impl BiasEstimator {
    pub fn push(&mut self, accel: [i16; 3], gyro: [i16; 3]) {
        for i in 0..3 {
            self.accel[i] += f32::from(accel[i]);
            self.gyro[i] += f32::from(gyro[i]);
        }
        self.samples += 1;
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Mean offsets with 1 g removed from z. Zero bias if nothing was pushed.
    pub fn finish(&self) -> ImuBias {
        if self.samples == 0 {
            return ImuBias::default();
        }
        let n = self.samples as f32;
        let mut bias = ImuBias {
            accel: self.accel.map(|v| v / n),
            gyro: self.gyro.map(|v| v / n),
        };
        bias.accel[2] -= ACCEL_LSB_PER_G;
        bias
    }
}

/// One bias-corrected IMU reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSample {
    pub accel_g: [f32; 3],
    pub gyro_dps: [f32; 3],
}

impl ImuSample {
    pub fn from_raw(accel: [i16; 3], gyro: [i16; 3], bias: &ImuBias) -> Self {
        let mut sample = Self::default();
        for i in 0..3 {
            sample.accel_g[i] = (f32::from(accel[i]) - bias.accel[i]) / ACCEL_LSB_PER_G;
            sample.gyro_dps[i] = (f32::from(gyro[i]) - bias.gyro[i]) / GYRO_LSB_PER_DPS;
        }
        sample
    }
}

/// Wrap into `-180..=180`.
fn wrap_signed(deg: f32) -> f32 {
    heading_error(deg, 0.0)
}

#[derive(Debug, Default)]
pub struct AttitudeEstimator {
    euler: Euler,
    orientation: Orientation,
    initialised: bool,
}

impl AttitudeEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Advance by `dt` seconds. Angles are in degrees; yaw is `0..360`.
    pub fn update(&mut self, sample: &ImuSample, dt: f32) -> (Euler, Orientation) {
        let [ax, ay, az] = sample.accel_g;
        let [gx, gy, gz] = sample.gyro_dps;

        let roll_acc = ay.atan2(az).to_degrees();
        let pitch_acc = (-ax).atan2((ay * ay + az * az).sqrt()).to_degrees();

        if self.initialised {
            let roll = wrap_signed(self.euler.roll + gx * dt);
            let pitch = self.euler.pitch + gy * dt;
            self.euler.roll = wrap_signed(roll + ACCEL_TRUST * heading_error(roll_acc, roll));
            self.euler.pitch = pitch + ACCEL_TRUST * (pitch_acc - pitch);
        } else {
            self.euler.roll = roll_acc;
            self.euler.pitch = pitch_acc;
            self.initialised = true;
        }
        self.euler.yaw = wrap_heading(self.euler.yaw + gz * dt);

        if az < FLIP_ENTER_G {
            self.orientation = Orientation::Inverted;
        } else if az > FLIP_EXIT_G {
            self.orientation = Orientation::Upright;
        }

        (self.euler, self.orientation)
    }
}

//! ICM-42688-P IMU over SPI, used for orientation detection.

use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Error, Instance, Spi};
use embassy_time::{Duration, Timer};

const REG_DEVICE_CONFIG: u8 = 0x11;
const REG_ACCEL_DATA_X1: u8 = 0x1F;
const REG_PWR_MGMT0: u8 = 0x4E;
const REG_WHO_AM_I: u8 = 0x75;

const WHO_AM_I: u8 = 0x47;
const SOFT_RESET: u8 = 0x01;
/// Gyro and accel in low-noise mode.
const PWR_LOW_NOISE: u8 = 0x0F;

pub struct Icm42688<'d, T: Instance> {
    spi: Spi<'d, T, NoDma, NoDma>,
    cs: Output<'d, AnyPin>,
}

impl<'d, T: Instance> Icm42688<'d, T> {
    pub fn new(spi: Spi<'d, T, NoDma, NoDma>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs }
    }

    fn transfer(&mut self, rx: &mut [u8], tx: &[u8]) -> Result<(), Error> {
        self.cs.set_low();
        let res = self.spi.blocking_transfer(rx, tx);
        self.cs.set_high();
        res
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        let mut rx = [0u8; 2];
        self.transfer(&mut rx, &[reg & 0x7F, value])
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, Error> {
        let mut rx = [0u8; 2];
        self.transfer(&mut rx, &[reg | 0x80, 0x00])?;
        Ok(rx[1])
    }

    /// Reset and start both sensors. Returns `false` if the chip id is wrong.
    pub async fn init(&mut self) -> Result<bool, Error> {
        self.write_reg(REG_DEVICE_CONFIG, SOFT_RESET)?;
        Timer::after(Duration::from_millis(10)).await;

        let id = self.read_reg(REG_WHO_AM_I)?;
        self.write_reg(REG_PWR_MGMT0, PWR_LOW_NOISE)?;
        Timer::after(Duration::from_millis(50)).await;
        Ok(id == WHO_AM_I)
    }

    /// Raw `(accel, gyro)` counts, x/y/z.
    pub fn read_motion(&mut self) -> Result<([i16; 3], [i16; 3]), Error> {
        let mut tx = [0u8; 13];
        tx[0] = REG_ACCEL_DATA_X1 | 0x80;
        let mut rx = [0u8; 13];
        self.transfer(&mut rx, &tx)?;

        let word = |i: usize| i16::from_be_bytes([rx[1 + 2 * i], rx[2 + 2 * i]]);
        Ok(([word(0), word(1), word(2)], [word(3), word(4), word(5)]))
    }
}

//! Bit-banged DShot300 output on a GPIO pin.

use cortex_m::asm;
use embassy_stm32::gpio::{AnyPin, Level, Output, Speed};

use crate::comms::DshotLine;
use crate::error::CommsError;

/// One ESC line. Timing assumes the 168 MHz core clock.
pub struct Dshot300 {
    pin: Output<'static, AnyPin>,
}

impl Dshot300 {
    // Core cycles per bit phase.
    const BIT_CYCLES: u32 = 560;
    const ONE_HIGH_CYCLES: u32 = 420;
    const ZERO_HIGH_CYCLES: u32 = 210;
    const FRAME_GAP_CYCLES: u32 = 5200;

    pub fn new(pin: AnyPin) -> Self {
        Self {
            pin: Output::new(pin, Level::Low, Speed::VeryHigh),
        }
    }

    fn write_bit(&mut self, one: bool) {
        let high = if one {
            Self::ONE_HIGH_CYCLES
        } else {
            Self::ZERO_HIGH_CYCLES
        };
        self.pin.set_high();
        asm::delay(high);
        self.pin.set_low();
        asm::delay(Self::BIT_CYCLES - high);
    }
}

impl DshotLine for Dshot300 {
    fn send_frame(&mut self, frame: u16) -> Result<(), CommsError> {
        // Interrupts off for the ~60 µs frame or ISR jitter corrupts the bit timing.
        critical_section::with(|_| {
            for bit in (0..16).rev() {
                self.write_bit((frame >> bit) & 1 != 0);
            }
            self.pin.set_low();
            asm::delay(Self::FRAME_GAP_CYCLES);
        });
        Ok(())
    }
}

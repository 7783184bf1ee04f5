use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz;
use embassy_stm32::{Config, Peripherals};

/// STM32F405 from an 8 MHz crystal: 168 MHz core, 48 MHz for USB.
fn clock_config() -> Config {
    let mut config = Config::default();
    config.rcc.hse = Some(Hse {
        freq: Hertz(8_000_000),
        mode: HseMode::Oscillator,
    });
    config.rcc.pll_src = PllSource::HSE;
    config.rcc.pll = Some(Pll {
        prediv: PllPreDiv::DIV4,
        mul: PllMul::MUL168,
        divp: Some(PllPDiv::DIV2),
        divq: Some(PllQDiv::DIV7),
        divr: None,
    });
    config.rcc.sys = Sysclk::PLL1_P;
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV4;
    config.rcc.apb2_pre = APBPrescaler::DIV2;
    config
}

/// DShot bit timing in `drivers::dshot` assumes the 168 MHz clock set here.
pub fn init() -> Peripherals {
    embassy_stm32::init(clock_config())
}

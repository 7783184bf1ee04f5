#![no_std]
#![no_main]

mod board;
mod tasks;
mod usb;

use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Level, Output, Pin, Speed};
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz;
use embassy_stm32::usart::{Config as UsartConfig, Uart};
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::{bind_interrupts, interrupt, peripherals};
use embassy_time::{Duration, Instant, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use combat_controller::comms::{CommsImplId, DshotComms, EscComms};
use combat_controller::config::CoreConfig;
use combat_controller::drivers::dshot::Dshot300;
use combat_controller::drivers::icm42688::Icm42688;
use combat_controller::startup::bring_up;
use combat_controller::state::{SharedState, StatusLeds};

use crate::tasks::core_tasks::{control_task, output_task, watchdog_task};

type Escs = DshotComms<Dshot300>;

static STATE: StaticCell<SharedState> = StaticCell::new();
static ESCS: StaticCell<Escs> = StaticCell::new();

/// Preempts the thread executor, so a control task that stops yielding
/// cannot hold off the failsafe. UART5 is unused and serves as its vector.
static FAILSAFE_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn UART5() {
    FAILSAFE_EXECUTOR.on_interrupt()
}

bind_interrupts!(struct Irqs {
    UART4 => embassy_stm32::usart::InterruptHandler<peripherals::UART4>;
});

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Clocks (168 MHz)
    let p = board::init();

    // 2. Shared state, everything safe: Disarmed, zero outputs
    let state: &'static SharedState =
        STATE.init(SharedState::new(CoreConfig::default(), CommsImplId::Dshot));

    // 3. ESC lines: drive on MOTOR1..3, weapon on MOTOR4..6
    let escs: &'static Escs = ESCS.init(DshotComms::new([
        Dshot300::new(p.PB0.degrade()),
        Dshot300::new(p.PB1.degrade()),
        Dshot300::new(p.PA3.degrade()),
        Dshot300::new(p.PA2.degrade()),
        Dshot300::new(p.PC8.degrade()),
        Dshot300::new(p.PC9.degrade()),
    ]));
    let comms: &'static dyn EscComms = escs;

    // 4. Backend bring-up; a failure latches a hardware fault and we carry on
    //    with the system pinned in Disarmed so the link still reports it.
    if let Err(e) = bring_up(state, comms, Instant::now()) {
        defmt::error!("ESC bring-up failed: {}", e);
    }

    // 5. Safety-relevant tasks first; the watchdog runs at interrupt priority
    interrupt::UART5.set_priority(Priority::P6);
    let failsafe_spawner = FAILSAFE_EXECUTOR.start(interrupt::UART5);
    failsafe_spawner.spawn(watchdog_task(state, comms)).unwrap();
    spawner.spawn(output_task(state, comms)).unwrap();
    spawner.spawn(control_task(state)).unwrap();

    // 6. CRSF/ELRS receiver UART4 @ 420000 (RX=PA1)
    let mut crsf_config = UsartConfig::default();
    crsf_config.baudrate = 420_000;
    let crsf_uart = Uart::new(
        p.UART4, p.PA1, p.PA0,
        Irqs,
        p.DMA1_CH4, p.DMA1_CH2,
        crsf_config,
    ).unwrap();
    let (_crsf_tx, crsf_rx) = crsf_uart.split();
    spawner.spawn(tasks::crsf_task::crsf_task(crsf_rx, state)).unwrap();

    // 7. USB operator link
    let (usb_dev, usb_serial) = usb::init(p.USB_OTG_FS, p.PA12, p.PA11);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();
    spawner
        .spawn(tasks::telemetry_task::telemetry_task(usb_serial, state, comms))
        .unwrap();

    // 8. SPI1 @ 10 MHz, ICM-42688 for orientation (SCK=PA5, MOSI=PA7, MISO=PA6, CS=PB12)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = Hertz(10_000_000);
    let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, NoDma, NoDma, spi_config);
    let cs_imu = Output::new(p.PB12.degrade(), Level::High, Speed::VeryHigh);
    spawner
        .spawn(tasks::imu_task::imu_task(Icm42688::new(spi, cs_imu), state))
        .unwrap();

    // 9. Status LED (PC13): solid when armed, fast blink on fault, 1 Hz otherwise
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);
    loop {
        let code = state.leds.code();
        if code & StatusLeds::FAULT != 0 {
            led.toggle();
            Timer::after(Duration::from_millis(100)).await;
        } else if code & (StatusLeds::DRIVE_ARMED | StatusLeds::WEAPON_ARMED) != 0 {
            led.set_low();
            Timer::after(Duration::from_millis(100)).await;
        } else {
            led.toggle();
            Timer::after(Duration::from_millis(500)).await;
        }
    }
}

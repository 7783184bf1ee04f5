use embassy_stm32::usb_otg::{self, Driver};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

bind_interrupts!(pub struct Irqs {
    OTG_FS => usb_otg::InterruptHandler<peripherals::USB_OTG_FS>;
});

pub type UsbDriver = Driver<'static, peripherals::USB_OTG_FS>;
pub type UsbSerial<'a> = CdcAcmClass<'a, UsbDriver>;

/// Buffers the USB stack borrows for the life of the firmware.
struct UsbBuffers {
    config_desc: [u8; 256],
    bos_desc: [u8; 256],
    control_buf: [u8; 64],
    ep_out: [u8; 256],
    cdc_state: State<'static>,
}

static BUFFERS: StaticCell<UsbBuffers> = StaticCell::new();

#[embassy_executor::task]
pub async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}

/// CDC-ACM operator link on the OTG_FS port (PA12/PA11). Call once.
pub fn init(
    usb_periph: peripherals::USB_OTG_FS,
    dp: peripherals::PA12,
    dm: peripherals::PA11,
) -> (UsbDevice<'static, UsbDriver>, UsbSerial<'static>) {
    let UsbBuffers {
        config_desc,
        bos_desc,
        control_buf,
        ep_out,
        cdc_state,
    } = BUFFERS.init(UsbBuffers {
        config_desc: [0; 256],
        bos_desc: [0; 256],
        control_buf: [0; 64],
        ep_out: [0; 256],
        cdc_state: State::new(),
    });

    let mut usb_config = usb_otg::Config::default();
    usb_config.vbus_detection = false;
    let driver = Driver::new_fs(usb_periph, Irqs, dp, dm, ep_out, usb_config);

    let mut config = Config::new(0xc0de, 0xcafe);
    config.manufacturer = Some("combat-controller");
    config.product = Some("Robot control core");
    config.serial_number = Some("00000001");

    let mut builder = Builder::new(driver, config, config_desc, bos_desc, &mut [], control_buf);
    let class = CdcAcmClass::new(&mut builder, cdc_state, 64);
    (builder.build(), class)
}

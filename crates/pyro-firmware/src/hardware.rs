//! Peripheral bring-up for the pyro board
//!
//! Wiring (ESP32 DevKit):
//!
//! | Signal          | GPIO |
//! |-----------------|------|
//! | MAX31856 SCK    | 13   |
//! | MAX31856 SDI    | 14   |
//! | MAX31856 SDO    | 12   |
//! | MAX31856 CS     | 27   |
//! | MAX31856 DRDY   | 15   |
//! | SSD1306 SDA     | 21   |
//! | SSD1306 SCL     | 22   |

use embassy_time::Duration;
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::peripherals::{GPIO12, GPIO13, GPIO14, GPIO15, GPIO21, GPIO22, GPIO27, I2C0, SPI2};
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::{Async, Blocking};
use log::info;
use pyro_core::sensors::Max31856;

/// The thermocouple converter as wired on this board
pub type Thermocouple = Max31856<
    ExclusiveDevice<Spi<'static, Async>, Output<'static>, NoDelay>,
    Input<'static>,
>;

/// Pins used by the thermocouple converter
pub struct ThermocouplePins {
    pub sck: GPIO13<'static>,
    pub sdi: GPIO14<'static>,
    pub sdo: GPIO12<'static>,
    pub cs: GPIO27<'static>,
    pub drdy: GPIO15<'static>,
}

/// Build the MAX31856 driver on SPI2.
///
/// The converter only speaks SPI mode 1 and tops out at 5 MHz.
pub fn create_thermocouple(
    spi2: SPI2<'static>,
    pins: ThermocouplePins,
    ready_timeout: Duration,
) -> Thermocouple {
    let spi_bus = Spi::new(
        spi2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(1))
            .with_mode(Mode::_1),
    )
    .expect("Failed to configure thermocouple SPI bus")
    .with_sck(pins.sck)
    .with_mosi(pins.sdi)
    .with_miso(pins.sdo)
    .into_async();

    let cs = Output::new(pins.cs, Level::High, OutputConfig::default());
    let spi_device =
        ExclusiveDevice::new_no_delay(spi_bus, cs).expect("Failed to claim thermocouple CS");

    // DRDY is open drain on some breakouts
    let drdy = Input::new(pins.drdy, InputConfig::default().with_pull(Pull::Up));

    info!("Thermocouple SPI ready (SCK=13 SDI=14 SDO=12 CS=27 DRDY=15)");
    Max31856::new(spi_device, drdy, ready_timeout)
}

/// Initialize the I2C bus the OLED hangs off.
pub fn create_i2c_bus(
    i2c0: I2C0<'static>,
    sda: GPIO21<'static>,
    scl: GPIO22<'static>,
) -> I2c<'static, Blocking> {
    I2c::new(i2c0, I2cConfig::default().with_frequency(Rate::from_khz(400)))
        .expect("Failed to configure OLED I2C bus")
        .with_sda(sda)
        .with_scl(scl)
}

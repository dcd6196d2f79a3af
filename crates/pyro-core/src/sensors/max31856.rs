use core::fmt;

use embassy_time::{Duration, with_timeout};
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::{Operation, SpiDevice};
use log::{debug, error, info, warn};

use super::{Sensor, SensorError, ThermocoupleReadings};

const SENSOR_NAME: &str = "MAX31856";

// =============================================================================
// Register Addresses
// =============================================================================

pub const REG_CR0: u8 = 0x00;
pub const REG_CR1: u8 = 0x01;
pub const REG_MASK: u8 = 0x02;
pub const REG_CJTH: u8 = 0x0A;
pub const REG_LTCBH: u8 = 0x0C;
pub const REG_SR: u8 = 0x0F;

/// Set on the address byte to select a register write
const WRITE_BIT: u8 = 0x80;

// =============================================================================
// Configuration Register Bits
// =============================================================================

/// CR0: automatic (continuous) conversion mode
pub const CR0_CMODE: u8 = 0x80;
/// CR0: start a single conversion
pub const CR0_ONESHOT: u8 = 0x40;
/// CR0: open-circuit detection, first timing option
pub const CR0_OCFAULT0: u8 = 0x10;

/// CR1: thermocouple type field
const CR1_TC_TYPE_MASK: u8 = 0x0F;

/// Linearized thermocouple LSB in °C (19-bit value)
const TC_RESOLUTION_C: f32 = 0.007_812_5;
/// Cold-junction register scale: the 16-bit register reads as 1/256 °C
const CJ_SCALE: f32 = 256.0;

// =============================================================================
// Enums
// =============================================================================

/// Thermocouple type, or one of the raw voltage modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThermocoupleType {
    B = 0b0000,
    E = 0b0001,
    J = 0b0010,
    K = 0b0011,
    N = 0b0100,
    R = 0b0101,
    S = 0b0110,
    T = 0b0111,
    /// Voltage mode, gain 8
    VoltageGain8 = 0b1000,
    /// Voltage mode, gain 32
    VoltageGain32 = 0b1100,
}

impl ThermocoupleType {
    /// Convert from the CR1 register value
    pub fn from_register(val: u8) -> Option<Self> {
        match val & CR1_TC_TYPE_MASK {
            0b0000 => Some(Self::B),
            0b0001 => Some(Self::E),
            0b0010 => Some(Self::J),
            0b0011 => Some(Self::K),
            0b0100 => Some(Self::N),
            0b0101 => Some(Self::R),
            0b0110 => Some(Self::S),
            0b0111 => Some(Self::T),
            0b1000 => Some(Self::VoltageGain8),
            0b1100 => Some(Self::VoltageGain32),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::B => "B Type",
            Self::E => "E Type",
            Self::J => "J Type",
            Self::K => "K Type",
            Self::N => "N Type",
            Self::R => "R Type",
            Self::S => "S Type",
            Self::T => "T Type",
            Self::VoltageGain8 => "Voltage x8 Gain mode",
            Self::VoltageGain32 => "Voltage x32 Gain mode",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    /// Converts roughly every 100 ms and pulls DRDY low after each result
    Continuous,
    /// Converts once per [`Max31856::trigger_one_shot`]
    OneShot,
}

// =============================================================================
// Fault Status
// =============================================================================

/// Decoded contents of the fault status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultFlags(u8);

impl FaultFlags {
    pub const CJ_RANGE: Self = Self(0x80);
    pub const TC_RANGE: Self = Self(0x40);
    pub const CJ_HIGH: Self = Self(0x20);
    pub const CJ_LOW: Self = Self(0x10);
    pub const TC_HIGH: Self = Self(0x08);
    pub const TC_LOW: Self = Self(0x04);
    pub const OVER_UNDER_VOLTAGE: Self = Self(0x02);
    pub const OPEN: Self = Self(0x01);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::CJ_RANGE, "Cold Junction Range Fault"),
        (Self::TC_RANGE, "Thermocouple Range Fault"),
        (Self::CJ_HIGH, "Cold Junction High Fault"),
        (Self::CJ_LOW, "Cold Junction Low Fault"),
        (Self::TC_HIGH, "Thermocouple High Fault"),
        (Self::TC_LOW, "Thermocouple Low Fault"),
        (Self::OVER_UNDER_VOLTAGE, "Over/Under Voltage Fault"),
        (Self::OPEN, "Thermocouple Open Fault"),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Names of every fault currently set, most significant bit first
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl fmt::Display for FaultFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (i, name) in self.names().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Decode LTCBH..LTCBL into °C.
///
/// The 19-bit two's complement value is left-aligned in the three bytes.
pub fn decode_thermocouple(raw: [u8; 3]) -> f32 {
    let value = i32::from_be_bytes([raw[0], raw[1], raw[2], 0]) >> 13;
    value as f32 * TC_RESOLUTION_C
}

/// Decode CJTH..CJTL into °C.
pub fn decode_cold_junction(raw: [u8; 2]) -> f32 {
    i16::from_be_bytes(raw) as f32 / CJ_SCALE
}

// =============================================================================
// Driver Implementation
// =============================================================================

/// MAX31856 thermocouple-to-digital converter on an async SPI device.
///
/// The chip talks SPI mode 1. DRDY is an active-low output that falls when
/// a conversion result is ready; the driver waits for it with a bounded
/// timeout instead of spinning on the pin.
pub struct Max31856<SPI, DRDY> {
    spi: SPI,
    drdy: DRDY,
    ready_timeout: Duration,
    mode: ConversionMode,
}

impl<SPI, DRDY> Max31856<SPI, DRDY>
where
    SPI: SpiDevice,
    DRDY: Wait,
{
    pub fn new(spi: SPI, drdy: DRDY, ready_timeout: Duration) -> Self {
        Self {
            spi,
            drdy,
            ready_timeout,
            mode: ConversionMode::OneShot,
        }
    }

    // =========================================================================
    // Private SPI Helper Methods
    // =========================================================================

    async fn read_registers(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), SPI::Error> {
        self.spi
            .transaction(&mut [Operation::Write(&[reg & !WRITE_BIT]), Operation::Read(buf)])
            .await
    }

    async fn read_register(&mut self, reg: u8) -> Result<u8, SPI::Error> {
        let mut buf = [0u8; 1];
        self.read_registers(reg, &mut buf).await?;
        Ok(buf[0])
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<(), SPI::Error> {
        self.spi.write(&[reg | WRITE_BIT, value]).await
    }

    fn bus_error(operation: &'static str, e: SPI::Error) -> SensorError {
        error!("{} {} failed: {:?}", SENSOR_NAME, operation, e);
        SensorError::ReadFailed {
            sensor: SENSOR_NAME,
            operation,
            details: "SPI communication error",
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Bring the converter up with the given thermocouple type and conversion mode.
    ///
    /// All faults are unmasked and open-circuit detection is enabled. The
    /// thermocouple type is read back afterwards; a chip that does not answer with
    /// what was written is treated as absent.
    pub async fn init(
        &mut self,
        tc_type: ThermocoupleType,
        mode: ConversionMode,
    ) -> Result<(), SensorError> {
        let init_failed = |details| SensorError::InitializationFailed {
            sensor: SENSOR_NAME,
            details,
        };

        self.write_register(REG_MASK, 0x00)
            .await
            .map_err(|_| init_failed("failed to write fault mask"))?;
        self.write_register(REG_CR0, CR0_OCFAULT0)
            .await
            .map_err(|_| init_failed("failed to write CR0"))?;

        self.set_thermocouple_type(tc_type)
            .await
            .map_err(|_| init_failed("failed to set thermocouple type"))?;
        self.set_conversion_mode(mode)
            .await
            .map_err(|_| init_failed("failed to set conversion mode"))?;

        match self.thermocouple_type().await {
            Ok(Some(read_back)) if read_back == tc_type => {
                info!("Thermocouple type: {}", read_back.label());
                Ok(())
            }
            Ok(other) => {
                error!(
                    "{} answered with type {:?} after writing {:?}",
                    SENSOR_NAME, other, tc_type
                );
                Err(init_failed("thermocouple type read back mismatch"))
            }
            Err(_) => Err(init_failed("failed to read back CR1")),
        }
    }

    pub async fn set_thermocouple_type(
        &mut self,
        tc_type: ThermocoupleType,
    ) -> Result<(), SensorError> {
        let cr1 = self
            .read_register(REG_CR1)
            .await
            .map_err(|e| Self::bus_error("read CR1", e))?;
        self.write_register(REG_CR1, (cr1 & !CR1_TC_TYPE_MASK) | tc_type as u8)
            .await
            .map_err(|e| Self::bus_error("write CR1", e))
    }

    /// Read the configured thermocouple type back from CR1.
    ///
    /// Returns `None` for reserved type codes.
    pub async fn thermocouple_type(&mut self) -> Result<Option<ThermocoupleType>, SensorError> {
        let cr1 = self
            .read_register(REG_CR1)
            .await
            .map_err(|e| Self::bus_error("read CR1", e))?;
        Ok(ThermocoupleType::from_register(cr1))
    }

    pub async fn set_conversion_mode(&mut self, mode: ConversionMode) -> Result<(), SensorError> {
        let cr0 = self
            .read_register(REG_CR0)
            .await
            .map_err(|e| Self::bus_error("read CR0", e))?;
        let cr0 = match mode {
            ConversionMode::Continuous => (cr0 | CR0_CMODE) & !CR0_ONESHOT,
            ConversionMode::OneShot => cr0 & !CR0_CMODE,
        };
        self.write_register(REG_CR0, cr0)
            .await
            .map_err(|e| Self::bus_error("write CR0", e))?;
        self.mode = mode;
        Ok(())
    }

    pub fn conversion_mode(&self) -> ConversionMode {
        self.mode
    }

    /// Start a single conversion. Only meaningful in one-shot mode.
    pub async fn trigger_one_shot(&mut self) -> Result<(), SensorError> {
        let cr0 = self
            .read_register(REG_CR0)
            .await
            .map_err(|e| Self::bus_error("read CR0", e))?;
        self.write_register(REG_CR0, (cr0 & !CR0_CMODE) | CR0_ONESHOT)
            .await
            .map_err(|e| Self::bus_error("write CR0", e))
    }

    // =========================================================================
    // Measurement
    // =========================================================================

    /// Wait for DRDY to go low, bounded by the ready timeout.
    pub async fn wait_ready(&mut self) -> Result<(), SensorError> {
        match with_timeout(self.ready_timeout, self.drdy.wait_for_low()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("{} data-ready pin error: {:?}", SENSOR_NAME, e);
                Err(SensorError::ReadFailed {
                    sensor: SENSOR_NAME,
                    operation: "wait for data ready",
                    details: "data-ready pin error",
                })
            }
            Err(_) => {
                warn!(
                    "{} data not ready after {} ms",
                    SENSOR_NAME,
                    self.ready_timeout.as_millis()
                );
                Err(SensorError::Timeout {
                    sensor: SENSOR_NAME,
                    operation: "observe data ready",
                })
            }
        }
    }

    pub async fn read_thermocouple_temperature(&mut self) -> Result<f32, SensorError> {
        let mut raw = [0u8; 3];
        self.read_registers(REG_LTCBH, &mut raw)
            .await
            .map_err(|e| Self::bus_error("read thermocouple temperature", e))?;
        Ok(decode_thermocouple(raw))
    }

    pub async fn read_cold_junction_temperature(&mut self) -> Result<f32, SensorError> {
        let mut raw = [0u8; 2];
        self.read_registers(REG_CJTH, &mut raw)
            .await
            .map_err(|e| Self::bus_error("read cold junction temperature", e))?;
        Ok(decode_cold_junction(raw))
    }

    pub async fn read_fault(&mut self) -> Result<FaultFlags, SensorError> {
        let sr = self
            .read_register(REG_SR)
            .await
            .map_err(|e| Self::bus_error("read fault status", e))?;
        Ok(FaultFlags::from_bits(sr))
    }

    /// Release the bus and the data-ready pin.
    pub fn release(self) -> (SPI, DRDY) {
        (self.spi, self.drdy)
    }
}

impl<SPI, DRDY> Sensor for Max31856<SPI, DRDY>
where
    SPI: SpiDevice,
    DRDY: Wait,
{
    type Readings = ThermocoupleReadings;

    async fn read(&mut self) -> Result<ThermocoupleReadings, SensorError> {
        if self.mode == ConversionMode::OneShot {
            self.trigger_one_shot().await?;
        }

        self.wait_ready().await?;

        let faults = self.read_fault().await?;
        if !faults.is_empty() {
            for name in faults.names() {
                warn!("{}: {}", SENSOR_NAME, name);
            }
            return Err(SensorError::Fault {
                sensor: SENSOR_NAME,
                faults,
            });
        }

        let temperature = self.read_thermocouple_temperature().await?;
        let cold_junction = self.read_cold_junction_temperature().await?;
        debug!(
            "{} raw: thermocouple {} C, cold junction {} C",
            SENSOR_NAME, temperature, cold_junction
        );

        Ok(ThermocoupleReadings::from_celsius(temperature, cold_junction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDrdy, FakeSpi};
    use embassy_futures::block_on;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn driver(spi: FakeSpi, drdy: FakeDrdy) -> Max31856<FakeSpi, FakeDrdy> {
        Max31856::new(spi, drdy, TIMEOUT)
    }

    #[test]
    fn decodes_positive_thermocouple_temperature() {
        assert_eq!(decode_thermocouple([0x1C, 0x20, 0x00]), 450.0);
    }

    #[test]
    fn decodes_negative_thermocouple_temperature() {
        assert_eq!(decode_thermocouple([0xFF, 0x38, 0x00]), -12.5);
    }

    #[test]
    fn decodes_cold_junction_temperature() {
        assert_eq!(decode_cold_junction([0x17, 0x80]), 23.5);
        assert_eq!(decode_cold_junction([0xFF, 0x00]), -1.0);
    }

    #[test]
    fn thermocouple_type_round_trips_through_register() {
        for tc_type in [
            ThermocoupleType::B,
            ThermocoupleType::K,
            ThermocoupleType::R,
            ThermocoupleType::VoltageGain32,
        ] {
            assert_eq!(
                ThermocoupleType::from_register(0xF0 | tc_type as u8),
                Some(tc_type)
            );
        }
        assert_eq!(ThermocoupleType::from_register(0b1001), None);
    }

    #[test]
    fn fault_flags_list_names_in_register_order() {
        let faults = FaultFlags::from_bits(0x41);
        let mut names = faults.names();
        assert_eq!(names.next(), Some("Thermocouple Range Fault"));
        assert_eq!(names.next(), Some("Thermocouple Open Fault"));
        assert_eq!(names.next(), None);
        assert!(faults.contains(FaultFlags::OPEN));
        assert!(!faults.contains(FaultFlags::CJ_HIGH));
    }

    #[test]
    fn init_configures_type_and_continuous_mode() {
        let mut sensor = driver(FakeSpi::new(), FakeDrdy::ready());
        block_on(sensor.init(ThermocoupleType::R, ConversionMode::Continuous)).unwrap();

        let (spi, _) = sensor.release();
        assert_eq!(spi.register(REG_MASK), 0x00);
        assert_eq!(spi.register(REG_CR1) & CR1_TC_TYPE_MASK, ThermocoupleType::R as u8);
        assert_eq!(spi.register(REG_CR0), CR0_CMODE | CR0_OCFAULT0);
    }

    #[test]
    fn init_fails_when_chip_does_not_answer() {
        let mut sensor = driver(FakeSpi::unresponsive(), FakeDrdy::ready());
        let result = block_on(sensor.init(ThermocoupleType::R, ConversionMode::Continuous));
        assert!(matches!(
            result,
            Err(SensorError::InitializationFailed {
                details: "thermocouple type read back mismatch",
                ..
            })
        ));
    }

    #[test]
    fn init_fails_on_bus_error() {
        let mut sensor = driver(FakeSpi::failing(), FakeDrdy::ready());
        let result = block_on(sensor.init(ThermocoupleType::K, ConversionMode::Continuous));
        assert!(matches!(
            result,
            Err(SensorError::InitializationFailed { .. })
        ));
    }

    #[test]
    fn read_returns_truncated_readings() {
        let mut spi = FakeSpi::new();
        spi.set_temperatures([0x1C, 0x20, 0x00], [0x17, 0x80]);
        let mut sensor = driver(spi, FakeDrdy::ready());
        block_on(sensor.init(ThermocoupleType::R, ConversionMode::Continuous)).unwrap();

        let readings = block_on(sensor.read()).unwrap();
        assert_eq!(
            readings,
            ThermocoupleReadings {
                temperature: 450,
                cold_junction: 23,
            }
        );
    }

    #[test]
    fn read_reports_faults_instead_of_values() {
        let mut spi = FakeSpi::new();
        spi.set_temperatures([0x1C, 0x20, 0x00], [0x17, 0x80]);
        spi.set_register(REG_SR, FaultFlags::OPEN.bits());
        let mut sensor = driver(spi, FakeDrdy::ready());
        block_on(sensor.init(ThermocoupleType::R, ConversionMode::Continuous)).unwrap();

        let result = block_on(sensor.read());
        assert_eq!(
            result,
            Err(SensorError::Fault {
                sensor: "MAX31856",
                faults: FaultFlags::OPEN,
            })
        );
    }

    #[test]
    fn read_times_out_when_data_never_becomes_ready() {
        // A zero timeout expires without moving the clock
        let mut sensor = Max31856::new(FakeSpi::new(), FakeDrdy::stuck(), Duration::from_ticks(0));
        block_on(sensor.init(ThermocoupleType::R, ConversionMode::Continuous)).unwrap();

        let before = embassy_time::Instant::now();
        let result = block_on(sensor.read());
        assert!(matches!(result, Err(SensorError::Timeout { .. })));
        assert_eq!(embassy_time::Instant::now(), before);
    }

    #[test]
    fn one_shot_read_triggers_a_conversion() {
        let mut sensor = driver(FakeSpi::new(), FakeDrdy::ready());
        block_on(sensor.init(ThermocoupleType::K, ConversionMode::OneShot)).unwrap();
        assert_eq!(sensor.conversion_mode(), ConversionMode::OneShot);

        block_on(sensor.read()).unwrap();
        let (spi, _) = sensor.release();
        assert_ne!(spi.register(REG_CR0) & CR0_ONESHOT, 0);
        assert_eq!(spi.register(REG_CR0) & CR0_CMODE, 0);
    }
}

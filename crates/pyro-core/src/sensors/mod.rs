mod max31856;

pub use max31856::*;

use core::fmt;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: initialization failed: {details}")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: {operation} failed: {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: timed out waiting to {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("{sensor}: fault reported: {faults}")]
    Fault {
        sensor: &'static str,
        faults: FaultFlags,
    },
}

/// One thermocouple sample in whole degrees Celsius.
///
/// Fractional degrees are discarded (truncated toward zero) when a reading
/// is produced from the driver's floating-point output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThermocoupleReadings {
    pub temperature: i32,
    pub cold_junction: i32,
}

impl ThermocoupleReadings {
    pub fn from_celsius(temperature: f32, cold_junction: f32) -> Self {
        Self {
            temperature: temperature as i32,
            cold_junction: cold_junction as i32,
        }
    }
}

impl fmt::Display for ThermocoupleReadings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "thermocouple {}c, cold junction {}c",
            self.temperature, self.cold_junction
        )
    }
}

/// Trait for sensors that produce typed readings.
pub trait Sensor {
    /// The type of readings this sensor produces.
    type Readings;

    /// Wait for the next sample and return it.
    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}

use core::fmt::{Debug, Write as _};

use embassy_time::{Duration, Instant};
use thiserror_no_std::Error;

use crate::config::ConfigError;
use crate::sensors::{SensorError, ThermocoupleReadings};

/// High level lifecycle of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    Uninitialized,
    WifiConnecting,
    Running,
    /// A fatal startup error occurred; the device does nothing further.
    Halted,
}

/// Everything the control loop remembers between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub run_state: AppRunState,
    pub wifi_connected: bool,
    /// Latest reading, `None` when the last sensor read failed or nothing
    /// has been read yet.
    pub last_reading: Option<ThermocoupleReadings>,
    pub last_sensor_error: Option<SensorError>,
    /// When telemetry was last sent (or the device booted)
    pub last_send: Instant,
    pub cycles: u32,
    pub sensor_failures: u32,
    /// Telemetry values that reached the transport
    pub values_sent: u32,
}

impl DeviceState {
    pub fn new(now: Instant) -> Self {
        Self {
            run_state: AppRunState::Uninitialized,
            wifi_connected: false,
            last_reading: None,
            last_sensor_error: None,
            last_send: now,
            cycles: 0,
            sensor_failures: 0,
            values_sent: 0,
        }
    }

    pub fn record_reading(&mut self, readings: ThermocoupleReadings) {
        self.last_reading = Some(readings);
        self.last_sensor_error = None;
    }

    pub fn record_sensor_error(&mut self, error: SensorError) {
        self.last_reading = None;
        self.last_sensor_error = Some(error);
        self.sensor_failures = self.sensor_failures.wrapping_add(1);
    }

    /// Whether strictly more than `interval` has passed since the last send
    pub fn telemetry_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_send) > interval
    }
}

/// Fatal errors: any of these stops the device at startup.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Display error: {0}")]
    Display(heapless::String<64>),
    #[error("Sensor error: {0}")]
    Sensor(SensorError),
    #[error("Configuration error: {0}")]
    Config(ConfigError),
}

impl AppError {
    /// Wrap a panel driver error, keeping its debug text.
    pub fn display(error: impl Debug) -> Self {
        let mut details = heapless::String::new();
        // Truncated on overflow, which is fine for a log line.
        let _ = write!(details, "{:?}", error);
        Self::Display(details)
    }
}

impl From<SensorError> for AppError {
    fn from(error: SensorError) -> Self {
        Self::Sensor(error)
    }
}

impl From<ConfigError> for AppError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

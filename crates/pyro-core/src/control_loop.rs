//! Main control loop
//!
//! One iteration: read the thermocouple and show the reading (or, when the
//! read failed, let a parked reading through), keep the telemetry session
//! alive, and when the send interval has passed, push the reading to the
//! telemetry service. Nothing runs concurrently; every step is awaited in
//! order.
//!
//! [`Controller::step`] takes the current time as an argument and returns
//! what it decided, so the whole loop can be driven from tests and the
//! simulator with virtual time.

use core::fmt::Debug;

use embassy_time::{Duration, Instant, Timer};
use log::{debug, error, info, warn};

use crate::app_state::{AppError, AppRunState, DeviceState};
use crate::config::{Config, TimingConfig};
use crate::display::{Panel, ReadingDisplay, RenderOutcome};
use crate::network::{ConnectivityManager, WifiRadio};
use crate::sensors::{Sensor, SensorError, ThermocoupleReadings};
use crate::telemetry::{SendOutcome, TelemetryTransport, TelemetryUplink};

/// What the telemetry half of a cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryDecision {
    /// The send interval has not passed yet
    NotDue,
    /// Due, but there is no reading worth sending
    NoValidReading,
    /// Due, but WiFi is down and could not be brought back this cycle.
    /// The send timer is left alone so the next cycle tries again.
    Offline,
    /// The send timer was reset and the readings handed to the uplink
    Sent(SendOutcome),
}

/// Summary of one control loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub reading: Result<ThermocoupleReadings, SensorError>,
    /// `None` when nothing reached the panel or was parked for it
    pub display: Option<RenderOutcome>,
    pub telemetry: TelemetryDecision,
}

pub struct Controller<'c, S, P, R, T> {
    sensor: S,
    display: ReadingDisplay<P>,
    network: ConnectivityManager<'c, R>,
    uplink: TelemetryUplink<T>,
    timing: TimingConfig,
    send_interval: Duration,
    state: DeviceState,
}

impl<'c, S, P, R, T> Controller<'c, S, P, R, T>
where
    S: Sensor<Readings = ThermocoupleReadings>,
    P: Panel,
    P::Error: Debug,
    R: WifiRadio,
    T: TelemetryTransport,
{
    pub fn new(
        sensor: S,
        panel: P,
        radio: R,
        transport: T,
        config: &'c Config<'c>,
        now: Instant,
    ) -> Self {
        Self {
            sensor,
            display: ReadingDisplay::new(panel, config.timing.display_settle()),
            network: ConnectivityManager::from_config(radio, &config.network),
            uplink: TelemetryUplink::new(transport),
            timing: config.timing,
            send_interval: config.telemetry.send_interval(),
            state: DeviceState::new(now),
        }
    }

    /// Show the boot frame and make the first WiFi attempt.
    ///
    /// Only a panel failure is fatal. Not finding a network just leaves the
    /// device offline until a later cycle reconnects.
    pub async fn start(&mut self, now: Instant) -> Result<(), AppError> {
        info!("Starting control loop");

        if let Err(e) = self.display.show_boot(now) {
            error!("Display failed to show boot frame: {:?}", e);
            self.state.run_state = AppRunState::Halted;
            return Err(AppError::display(e));
        }

        self.state.run_state = AppRunState::WifiConnecting;
        if let Err(e) = self.network.join(now).await {
            warn!("Starting offline: {}", e);
        }
        self.state.wifi_connected = self.network.is_connected();

        self.state.last_send = now;
        self.state.run_state = AppRunState::Running;
        Ok(())
    }

    /// Run one iteration of the loop at time `now`.
    pub async fn step(&mut self, now: Instant) -> CycleReport {
        self.state.cycles = self.state.cycles.wrapping_add(1);

        let reading = self.sensor.read().await;
        let display = match reading {
            Ok(readings) => {
                info!("Read {}", readings);
                self.state.record_reading(readings);
                self.render(now, &readings)
            }
            Err(e) => {
                error!("Thermocouple read failed: {}", e);
                self.state.record_sensor_error(e);
                self.flush_parked(now)
            }
        };

        let telemetry = self.telemetry(now).await;
        debug!("Cycle {} telemetry: {:?}", self.state.cycles, telemetry);

        CycleReport {
            reading,
            display,
            telemetry,
        }
    }

    fn render(&mut self, now: Instant, readings: &ThermocoupleReadings) -> Option<RenderOutcome> {
        match self.display.render(now, readings) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Display update failed: {:?}", e);
                None
            }
        }
    }

    /// Draw a reading parked during the last settle window, if it is over.
    fn flush_parked(&mut self, now: Instant) -> Option<RenderOutcome> {
        match self.display.service(now) {
            Ok(Some(_)) => Some(RenderOutcome::Drawn),
            Ok(None) => None,
            Err(e) => {
                warn!("Display update failed: {:?}", e);
                None
            }
        }
    }

    async fn telemetry(&mut self, now: Instant) -> TelemetryDecision {
        self.uplink.service(now).await;

        if !self.state.telemetry_due(now, self.send_interval) {
            return TelemetryDecision::NotDue;
        }

        let Some(readings) = self.state.last_reading else {
            debug!("Telemetry due but the last read failed, skipping");
            return TelemetryDecision::NoValidReading;
        };
        if readings.temperature == 0 && self.timing.zero_reading_is_no_data {
            debug!("Telemetry due but the reading is 0, treating as no data");
            return TelemetryDecision::NoValidReading;
        }

        let online = self.network.reconnect(now).await;
        self.state.wifi_connected = online;
        if !online {
            warn!("WiFi unavailable, skipping telemetry");
            return TelemetryDecision::Offline;
        }

        self.state.last_send = now;
        let outcome = self
            .uplink
            .send_readings(readings.temperature, readings.cold_junction, now)
            .await;
        self.state.values_sent = self
            .state
            .values_sent
            .wrapping_add(outcome.delivered() as u32);
        TelemetryDecision::Sent(outcome)
    }

    /// Loop forever, pausing for the configured loop delay before each
    /// iteration.
    pub async fn run(&mut self) -> ! {
        loop {
            Timer::after(self.timing.loop_delay()).await;
            self.step(Instant::now()).await;
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn display(&self) -> &ReadingDisplay<P> {
        &self.display
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn network(&self) -> &ConnectivityManager<'c, R> {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut ConnectivityManager<'c, R> {
        &mut self.network
    }

    pub fn uplink(&self) -> &TelemetryUplink<T> {
        &self.uplink
    }
}

//! Desktop simulator for the pyro-rs thermocouple telemetry device.
//!
//! Runs the real `pyro_core` control loop against simulated hardware:
//!
//! - a thermocouple following a kiln firing curve, with one reading of
//!   exactly 0 and a short open-circuit fault injected along the way
//! - a WiFi radio whose only known network drops out for a while
//! - a loopback telemetry server that speaks just enough MQTT and HTTP to
//!   accept the device's session and logs every JSON value it receives
//! - an in-memory 128x32 panel, dumped as ASCII art at debug level
//!
//! Time is virtual: every cycle advances the embassy mock clock by
//! [`CYCLE`], then sleeps a little real time so the log is readable.
//!
//! # Usage
//!
//! ```text
//! pyro-simulator [mqtt|http] [--fast]
//! RUST_LOG=debug pyro-simulator     # also draw the panel
//! ```

use std::cell::Cell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use std::{env, thread};

use embassy_futures::block_on;
use embassy_time::{Duration, Instant, MockDriver};
use embedded_graphics::Pixel;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use embedded_graphics_simulator::SimulatorDisplay;
use embedded_io::ErrorKind;
use log::{Level, debug, error, info, log_enabled, warn};

use pyro_core::config::{Config, KnownNetwork, NetworkConfig, Transport};
use pyro_core::control_loop::{Controller, CycleReport, TelemetryDecision};
use pyro_core::display::{PANEL_HEIGHT_PX, PANEL_WIDTH_PX, Panel};
use pyro_core::network::{ScanResults, Ssid, WifiRadio};
use pyro_core::sensors::{FaultFlags, Sensor, SensorError, ThermocoupleReadings};
use pyro_core::telemetry::{AnyTransport, Link, TelemetryError};

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// Virtual time per control loop iteration
const CYCLE: Duration = Duration::from_millis(500);

/// Real time slept per iteration unless `--fast` is given
const REALTIME_PACING: std::time::Duration = std::time::Duration::from_millis(50);

/// Total virtual run time
const RUN_TIME: Duration = Duration::from_secs(15 * 60);

const KILN_NETWORK: &str = "kiln-shed";
const KILN_PASSPHRASE: &str = "cone-ten";
const NEIGHBOUR_NETWORK: &str = "neighbours-5g";

/// Virtual seconds during which the kiln network is out of range
const OUTAGE_SECS: core::ops::Range<u64> = 120..200;

/// The thermocouple reports exactly 0 during this window
const ZERO_READING_SECS: core::ops::Range<u64> = 44..46;

/// The thermocouple reads as open circuit during this window
const FAULT_SECS: core::ops::Range<u64> = 300..303;

fn elapsed_secs() -> u64 {
    Instant::now().as_secs()
}

// ---------------------------------------------------------------------------
// Kiln thermocouple
// ---------------------------------------------------------------------------

/// Ramp to a cone 6 glaze firing, hold, then cool naturally.
fn kiln_temperature(t: f32) -> f32 {
    const AMBIENT: f32 = 20.0;
    const PEAK: f32 = 1220.0;
    const RAMP_RATE: f32 = 3.0;
    const HOLD_SECS: f32 = 90.0;

    let ramp_end = (PEAK - AMBIENT) / RAMP_RATE;
    let base = if t < ramp_end {
        AMBIENT + RAMP_RATE * t
    } else if t < ramp_end + HOLD_SECS {
        PEAK
    } else {
        let cooling = t - ramp_end - HOLD_SECS;
        AMBIENT + (PEAK - AMBIENT) * (-cooling / 400.0).exp()
    };

    // Element cycling
    base + 1.5 * (t / 7.0).sin()
}

/// The electronics box warms up slowly next to the kiln.
fn cold_junction_temperature(t: f32) -> f32 {
    (22.0 + t / 60.0).min(38.0)
}

struct KilnThermocouple;

impl Sensor for KilnThermocouple {
    type Readings = ThermocoupleReadings;

    async fn read(&mut self) -> Result<ThermocoupleReadings, SensorError> {
        let secs = elapsed_secs();
        let t = Instant::now().as_millis() as f32 / 1000.0;

        if FAULT_SECS.contains(&secs) {
            return Err(SensorError::Fault {
                sensor: "MAX31856",
                faults: FaultFlags::OPEN,
            });
        }

        let cold_junction = cold_junction_temperature(t);
        if ZERO_READING_SECS.contains(&secs) {
            return Ok(ThermocoupleReadings::from_celsius(0.0, cold_junction));
        }

        Ok(ThermocoupleReadings::from_celsius(
            kiln_temperature(t),
            cold_junction,
        ))
    }
}

// ---------------------------------------------------------------------------
// WiFi
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct OutOfRange;

/// Radio in a shed where the kiln network comes and goes.
///
/// `online` is shared with the loopback server so a dropped association
/// also takes the telemetry connection down.
struct ShedRadio {
    associated: bool,
    online: Rc<Cell<bool>>,
}

impl ShedRadio {
    fn new(online: Rc<Cell<bool>>) -> Self {
        Self {
            associated: false,
            online,
        }
    }

    fn kiln_network_in_range() -> bool {
        !OUTAGE_SECS.contains(&elapsed_secs())
    }
}

impl WifiRadio for ShedRadio {
    type Error = OutOfRange;

    fn is_connected(&mut self) -> bool {
        if self.associated && !Self::kiln_network_in_range() {
            warn!("[radio] {} went out of range", KILN_NETWORK);
            self.associated = false;
        }
        self.online.set(self.associated);
        self.associated
    }

    async fn scan(&mut self) -> Result<ScanResults, OutOfRange> {
        let mut visible = vec![NEIGHBOUR_NETWORK];
        if Self::kiln_network_in_range() {
            visible.insert(0, KILN_NETWORK);
        }
        debug!("[radio] scan sees {:?}", visible);

        let mut results = ScanResults::new();
        for name in visible {
            let mut ssid = Ssid::new();
            let _ = ssid.push_str(name);
            let _ = results.push(ssid);
        }
        Ok(results)
    }

    async fn associate(&mut self, network: &KnownNetwork<'_>) -> Result<(), OutOfRange> {
        if network.ssid != KILN_NETWORK || !Self::kiln_network_in_range() {
            return Err(OutOfRange);
        }
        self.associated = true;
        self.online.set(true);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loopback telemetry server
// ---------------------------------------------------------------------------

/// Decode an MQTT variable byte integer: `(value, bytes used)`.
fn decode_remaining_length(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    for (i, byte) in bytes.iter().take(4).enumerate() {
        value |= ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Stands in for the ThingsBoard server at the far end of the link.
///
/// Bytes written by the device are parsed as soon as a complete MQTT packet
/// or HTTP request has arrived, and the answer is queued for the device to
/// read back.
struct LoopbackServer {
    online: Rc<Cell<bool>>,
    open: bool,
    from_device: Vec<u8>,
    to_device: VecDeque<u8>,
    values_received: Rc<Cell<u32>>,
}

impl LoopbackServer {
    fn new(online: Rc<Cell<bool>>, values_received: Rc<Cell<u32>>) -> Self {
        Self {
            online,
            open: false,
            from_device: Vec::new(),
            to_device: VecDeque::new(),
            values_received,
        }
    }

    fn receive_value(&self, route: &str, body: &[u8]) {
        info!("[server] {} <- {}", route, String::from_utf8_lossy(body));
        self.values_received.set(self.values_received.get() + 1);
    }

    fn process(&mut self) {
        while !self.from_device.is_empty() {
            let consumed = if self.from_device.starts_with(b"POST ") {
                self.process_http()
            } else {
                self.process_mqtt()
            };
            match consumed {
                Some(n) => {
                    self.from_device.drain(..n);
                }
                None => break,
            }
        }
    }

    /// Handle one MQTT v5 packet, returning how many bytes it used.
    fn process_mqtt(&mut self) -> Option<usize> {
        let (remaining, size) = decode_remaining_length(self.from_device.get(1..)?)?;
        let total = 1 + size + remaining;
        if self.from_device.len() < total {
            return None;
        }
        let body = &self.from_device[1 + size..total];

        match self.from_device[0] & 0xF0 {
            0x10 => {
                info!("[server] MQTT session opened");
                // Success, no properties
                self.to_device.extend([0x20, 0x03, 0x00, 0x00, 0x00]);
            }
            0x30 if body.len() >= 2 => {
                let topic_end = 2 + u16::from_be_bytes([body[0], body[1]]) as usize;
                let topic = String::from_utf8_lossy(body.get(2..topic_end)?).into_owned();
                let (properties, size) = decode_remaining_length(body.get(topic_end..)?)?;
                let payload = body.get(topic_end + size + properties..)?;
                self.receive_value(&topic, payload);
            }
            0xC0 => {
                debug!("[server] ping");
                self.to_device.extend([0xD0, 0x00]);
            }
            0xE0 => info!("[server] MQTT session closed by device"),
            other => warn!("[server] ignoring MQTT packet type {:#04x}", other),
        }
        Some(total)
    }

    /// Handle one HTTP request, returning how many bytes it used.
    fn process_http(&mut self) -> Option<usize> {
        let header_end = self
            .from_device
            .windows(4)
            .position(|w| w == b"\r\n\r\n")?;
        let head = String::from_utf8_lossy(&self.from_device[..header_end]).into_owned();

        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let total = header_end + 4 + content_length;
        if self.from_device.len() < total {
            return None;
        }

        let path = head.split(' ').nth(1).unwrap_or("?");
        self.receive_value(path, &self.from_device[header_end + 4..total]);
        self.to_device
            .extend(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        Some(total)
    }
}

impl embedded_io::ErrorType for LoopbackServer {
    type Error = ErrorKind;
}

impl embedded_io_async::Read for LoopbackServer {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        if !self.open {
            return Err(ErrorKind::NotConnected);
        }
        let n = buf.len().min(self.to_device.len());
        for (slot, byte) in buf.iter_mut().zip(self.to_device.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl embedded_io_async::Write for LoopbackServer {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        if !self.open {
            return Err(ErrorKind::NotConnected);
        }
        if !self.online.get() {
            warn!("[server] connection reset, device is off the network");
            self.open = false;
            return Err(ErrorKind::ConnectionReset);
        }
        self.from_device.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }
}

impl Link for LoopbackServer {
    async fn open(&mut self, host: &str, port: u16) -> Result<(), TelemetryError> {
        if !self.online.get() {
            return Err(TelemetryError::Connect);
        }
        debug!("[server] accepted connection for {}:{}", host, port);
        self.open = true;
        self.from_device.clear();
        self.to_device.clear();
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

// ---------------------------------------------------------------------------
// Panel
// ---------------------------------------------------------------------------

/// The OLED, kept in memory.
struct MemoryPanel {
    display: SimulatorDisplay<BinaryColor>,
    frames: u32,
}

impl MemoryPanel {
    fn new() -> Self {
        Self {
            display: SimulatorDisplay::new(Size::new(PANEL_WIDTH_PX, PANEL_HEIGHT_PX)),
            frames: 0,
        }
    }

    fn dump(&self) {
        let border: String = "-".repeat(PANEL_WIDTH_PX as usize + 2);
        debug!("{}", border);
        for y in 0..PANEL_HEIGHT_PX as i32 {
            let row: String = (0..PANEL_WIDTH_PX as i32)
                .map(|x| match self.display.get_pixel(Point::new(x, y)) {
                    BinaryColor::On => '#',
                    BinaryColor::Off => ' ',
                })
                .collect();
            debug!("|{}|", row);
        }
        debug!("{}", border);
    }
}

impl OriginDimensions for MemoryPanel {
    fn size(&self) -> Size {
        self.display.size()
    }
}

impl DrawTarget for MemoryPanel {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        self.display.draw_iter(pixels)
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        self.display.fill_solid(area, color)
    }
}

impl Panel for MemoryPanel {
    fn present(&mut self) -> Result<(), Self::Error> {
        self.frames += 1;
        if log_enabled!(Level::Debug) {
            debug!("[panel] frame {}", self.frames);
            self.dump();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn log_cycle(report: &CycleReport) {
    let t = elapsed_secs();
    match report.telemetry {
        TelemetryDecision::NotDue => {}
        TelemetryDecision::NoValidReading => info!("t={}s telemetry skipped: no valid reading", t),
        TelemetryDecision::Offline => warn!("t={}s telemetry skipped: offline", t),
        TelemetryDecision::Sent(outcome) => info!(
            "t={}s telemetry sent, {} value(s) delivered",
            t,
            outcome.delivered()
        ),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut transport = Transport::Mqtt;
    let mut paced = true;
    for arg in env::args().skip(1) {
        if arg == "--fast" {
            paced = false;
        } else if let Ok(parsed) = arg.parse() {
            transport = parsed;
        } else {
            error!("Unknown argument {:?}; usage: pyro-simulator [mqtt|http] [--fast]", arg);
            return;
        }
    }

    let networks = [KnownNetwork {
        ssid: KILN_NETWORK,
        passphrase: KILN_PASSPHRASE,
    }];
    let mut config = Config::default();
    config.network = match NetworkConfig::from_networks(&networks) {
        Ok(network) => network,
        Err(e) => {
            error!("Invalid network config: {}", e);
            return;
        }
    };
    config.telemetry.host = "thingsboard.local";
    config.telemetry.access_token = "SIMULATOR_TOKEN";
    config.telemetry.transport = transport;
    if let Err(e) = config.validate() {
        error!("Invalid config: {}", e);
        return;
    }

    info!("Starting pyro-rs simulator");
    info!(
        "Telemetry via {} to {}:{}, {} s of virtual time in {} ms steps",
        transport.label(),
        config.telemetry.host,
        config.telemetry.port(),
        RUN_TIME.as_secs(),
        CYCLE.as_millis()
    );

    let online = Rc::new(Cell::new(false));
    let values_received = Rc::new(Cell::new(0));
    let server = LoopbackServer::new(online.clone(), values_received.clone());

    let transport = match AnyTransport::from_config(server, &config.telemetry, None) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Telemetry setup failed: {}", e);
            return;
        }
    };

    let mut controller = Controller::new(
        KilnThermocouple,
        MemoryPanel::new(),
        ShedRadio::new(online),
        transport,
        &config,
        Instant::now(),
    );

    if let Err(e) = block_on(controller.start(Instant::now())) {
        error!("Startup failed: {}", e);
        return;
    }

    let driver = MockDriver::get();
    let end = Instant::now() + RUN_TIME;
    while Instant::now() < end {
        driver.advance(CYCLE);
        let report = block_on(controller.step(Instant::now()));
        log_cycle(&report);

        if paced {
            thread::sleep(REALTIME_PACING);
        }
    }

    let state = controller.state();
    info!(
        "Finished: {} cycles, {} sensor failures, {} values sent, {} received by the server",
        state.cycles,
        state.sensor_failures,
        state.values_sent,
        values_received.get()
    );
}

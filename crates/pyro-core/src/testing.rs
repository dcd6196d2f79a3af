//! In-memory stand-ins for the hardware and network the core talks to.

use std::collections::VecDeque;
use std::string::{String, ToString};
use std::vec;
use std::vec::Vec;

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::{Operation, SpiDevice};
use embedded_io::ErrorKind;

use crate::config::KnownNetwork;
use crate::display::Panel;
use crate::framebuffer::{FrameBuffer, PANEL_HEIGHT_PX, PANEL_WIDTH_PX};
use crate::network::{ScanResults, Ssid, WifiRadio};
use crate::sensors::{Sensor, SensorError, ThermocoupleReadings};
use crate::telemetry::{Link, TelemetryError, TelemetryTransport};

// ---------------------------------------------------------------------------
// MAX31856 bus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusBehavior {
    Normal,
    /// MISO floats high and writes go nowhere
    Unresponsive,
    /// Every transaction fails
    Failing,
}

/// Register-file model of a MAX31856 on an SPI bus.
pub struct FakeSpi {
    registers: [u8; 16],
    behavior: BusBehavior,
}

impl FakeSpi {
    pub fn new() -> Self {
        let mut registers = [0u8; 16];
        // Power-on default: type K, 1 sample averaging
        registers[0x01] = 0x03;
        registers[0x02] = 0xFF;
        Self {
            registers,
            behavior: BusBehavior::Normal,
        }
    }

    pub fn unresponsive() -> Self {
        Self {
            behavior: BusBehavior::Unresponsive,
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: BusBehavior::Failing,
            ..Self::new()
        }
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.registers[(reg & 0x0F) as usize]
    }

    pub fn set_register(&mut self, reg: u8, value: u8) {
        self.registers[(reg & 0x0F) as usize] = value;
    }

    /// Load LTCBH..LTCBL and CJTH..CJTL.
    pub fn set_temperatures(&mut self, thermocouple: [u8; 3], cold_junction: [u8; 2]) {
        self.registers[0x0C..0x0F].copy_from_slice(&thermocouple);
        self.registers[0x0A..0x0C].copy_from_slice(&cold_junction);
    }

    fn load(&self, addr: u8) -> u8 {
        match self.behavior {
            BusBehavior::Unresponsive => 0xFF,
            _ => self.register(addr),
        }
    }

    fn store(&mut self, addr: u8, value: u8) {
        if self.behavior == BusBehavior::Normal {
            self.set_register(addr, value);
        }
    }
}

impl embedded_hal::spi::ErrorType for FakeSpi {
    type Error = embedded_hal::spi::ErrorKind;
}

impl SpiDevice for FakeSpi {
    async fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), Self::Error> {
        if self.behavior == BusBehavior::Failing {
            return Err(embedded_hal::spi::ErrorKind::Other);
        }

        // (address, is write); the first byte written selects the register
        let mut cursor: Option<(u8, bool)> = None;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    for &byte in bytes.iter() {
                        cursor = match cursor {
                            None => Some((byte & 0x7F, byte & 0x80 != 0)),
                            Some((addr, true)) => {
                                self.store(addr, byte);
                                Some((addr.wrapping_add(1), true))
                            }
                            read => read,
                        };
                    }
                }
                Operation::Read(buf) => {
                    for slot in buf.iter_mut() {
                        *slot = match cursor {
                            Some((addr, false)) => {
                                cursor = Some((addr.wrapping_add(1), false));
                                self.load(addr)
                            }
                            _ => 0xFF,
                        };
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Data-ready line
pub struct FakeDrdy {
    stuck: bool,
}

impl FakeDrdy {
    /// Conversion results are always available.
    pub fn ready() -> Self {
        Self { stuck: false }
    }

    /// The line never goes low; waiting on it never completes.
    pub fn stuck() -> Self {
        Self { stuck: true }
    }

    async fn settle(&mut self) -> Result<(), embedded_hal::digital::ErrorKind> {
        if self.stuck {
            core::future::pending::<()>().await;
        }
        Ok(())
    }
}

impl embedded_hal::digital::ErrorType for FakeDrdy {
    type Error = embedded_hal::digital::ErrorKind;
}

impl Wait for FakeDrdy {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        self.settle().await
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        self.settle().await
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        self.settle().await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        self.settle().await
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        self.settle().await
    }
}

// ---------------------------------------------------------------------------
// Sensor
// ---------------------------------------------------------------------------

/// Replays a fixed list of read results, then repeats the last one.
pub struct ScriptedSensor {
    script: VecDeque<Result<ThermocoupleReadings, SensorError>>,
    last: Result<ThermocoupleReadings, SensorError>,
    reads: usize,
}

impl ScriptedSensor {
    pub fn new(script: &[Result<ThermocoupleReadings, SensorError>]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            last: Err(SensorError::Timeout {
                sensor: "scripted",
                operation: "observe data ready",
            }),
            reads: 0,
        }
    }

    pub fn always(readings: ThermocoupleReadings) -> Self {
        Self::new(&[Ok(readings)])
    }

    pub fn push(&mut self, result: Result<ThermocoupleReadings, SensorError>) {
        self.script.push_back(result);
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl Sensor for ScriptedSensor {
    type Readings = ThermocoupleReadings;

    async fn read(&mut self) -> Result<ThermocoupleReadings, SensorError> {
        self.reads += 1;
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last
    }
}

// ---------------------------------------------------------------------------
// Panel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelFault;

/// 128x32 panel that remembers every pixel it was sent.
pub struct RecordingPanel {
    pixels: Vec<BinaryColor>,
    pixel_writes: usize,
    presents: usize,
    broken: bool,
}

impl RecordingPanel {
    pub fn new() -> Self {
        Self {
            pixels: vec![BinaryColor::Off; (PANEL_WIDTH_PX * PANEL_HEIGHT_PX) as usize],
            pixel_writes: 0,
            presents: 0,
            broken: false,
        }
    }

    /// A panel whose bus has gone away
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::new()
        }
    }

    pub fn pixel(&self, point: Point) -> BinaryColor {
        if !self.bounding_box().contains(point) {
            return BinaryColor::Off;
        }
        self.pixels[(point.y as u32 * PANEL_WIDTH_PX + point.x as u32) as usize]
    }

    pub fn lit_pixels(&self, area: &Rectangle) -> usize {
        area.points()
            .filter(|p| self.pixel(*p) == BinaryColor::On)
            .count()
    }

    /// Whether the panel shows exactly what `frame` holds
    pub fn matches(&self, frame: &FrameBuffer) -> bool {
        self.bounding_box()
            .points()
            .all(|p| self.pixel(p) == frame.pixel(p))
    }

    pub fn pixel_writes(&self) -> usize {
        self.pixel_writes
    }

    pub fn presents(&self) -> usize {
        self.presents
    }
}

impl OriginDimensions for RecordingPanel {
    fn size(&self) -> Size {
        Size::new(PANEL_WIDTH_PX, PANEL_HEIGHT_PX)
    }
}

impl DrawTarget for RecordingPanel {
    type Color = BinaryColor;
    type Error = PanelFault;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        if self.broken {
            return Err(PanelFault);
        }
        let bounds = self.bounding_box();
        for Pixel(point, color) in pixels {
            if bounds.contains(point) {
                self.pixels[(point.y as u32 * PANEL_WIDTH_PX + point.x as u32) as usize] = color;
                self.pixel_writes += 1;
            }
        }
        Ok(())
    }
}

impl Panel for RecordingPanel {
    fn present(&mut self) -> Result<(), Self::Error> {
        if self.broken {
            return Err(PanelFault);
        }
        self.presents += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WiFi
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioFault;

/// Radio surrounded by a configurable set of access points.
pub struct FakeRadio {
    in_range: Vec<String>,
    associated: Option<String>,
    refuse: bool,
    broken_scan: bool,
    scans: usize,
    associations: usize,
}

impl FakeRadio {
    pub fn in_range(ssids: &[&str]) -> Self {
        Self {
            in_range: ssids.iter().map(|s| s.to_string()).collect(),
            associated: None,
            refuse: false,
            broken_scan: false,
            scans: 0,
            associations: 0,
        }
    }

    /// Access points reject every association (wrong passphrase).
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn with_broken_scan(mut self) -> Self {
        self.broken_scan = true;
        self
    }

    pub fn set_in_range(&mut self, ssids: &[&str]) {
        self.in_range = ssids.iter().map(|s| s.to_string()).collect();
    }

    /// Lose the association, as when the access point goes away.
    pub fn drop_link(&mut self) {
        self.associated = None;
    }

    pub fn associated_with(&self) -> Option<&str> {
        self.associated.as_deref()
    }

    pub fn scans(&self) -> usize {
        self.scans
    }

    pub fn associations(&self) -> usize {
        self.associations
    }
}

impl WifiRadio for FakeRadio {
    type Error = RadioFault;

    fn is_connected(&mut self) -> bool {
        self.associated.is_some()
    }

    async fn scan(&mut self) -> Result<ScanResults, RadioFault> {
        self.scans += 1;
        if self.broken_scan {
            return Err(RadioFault);
        }

        let mut results = ScanResults::new();
        for name in &self.in_range {
            let mut ssid = Ssid::new();
            let _ = ssid.push_str(name);
            let _ = results.push(ssid);
        }
        Ok(results)
    }

    async fn associate(&mut self, network: &KnownNetwork<'_>) -> Result<(), RadioFault> {
        self.associations += 1;
        if self.refuse || !self.in_range.iter().any(|s| s == network.ssid) {
            return Err(RadioFault);
        }
        self.associated = Some(network.ssid.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// Scripted byte stream to a telemetry server.
///
/// Each `open` loads the next scripted reply as the inbound data; more can
/// be pushed later with [`FakeLink::push_inbound`].
pub struct FakeLink {
    replies: VecDeque<Vec<u8>>,
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    opened: Vec<(String, u16)>,
    open: bool,
    refuse: bool,
    broken_writes: bool,
}

impl FakeLink {
    pub fn new() -> Self {
        Self {
            replies: VecDeque::new(),
            inbound: VecDeque::new(),
            written: Vec::new(),
            opened: Vec::new(),
            open: false,
            refuse: false,
            broken_writes: false,
        }
    }

    /// A server that never accepts connections
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new()
        }
    }

    pub fn with_reply(mut self, reply: &[u8]) -> Self {
        self.replies.push_back(reply.to_vec());
        self
    }

    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    pub fn has_inbound(&self) -> bool {
        !self.inbound.is_empty()
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn clear_written(&mut self) {
        self.written.clear();
    }

    pub fn break_writes(&mut self) {
        self.broken_writes = true;
    }

    pub fn opened(&self) -> Vec<(&str, u16)> {
        self.opened
            .iter()
            .map(|(host, port)| (host.as_str(), *port))
            .collect()
    }
}

impl embedded_io::ErrorType for FakeLink {
    type Error = ErrorKind;
}

impl embedded_io_async::Read for FakeLink {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        if !self.open {
            return Err(ErrorKind::NotConnected);
        }
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl embedded_io_async::Write for FakeLink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        if self.broken_writes {
            return Err(ErrorKind::BrokenPipe);
        }
        if !self.open {
            return Err(ErrorKind::NotConnected);
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), ErrorKind> {
        Ok(())
    }
}

impl Link for FakeLink {
    async fn open(&mut self, host: &str, port: u16) -> Result<(), TelemetryError> {
        self.opened.push((host.to_string(), port));
        if self.refuse {
            return Err(TelemetryError::Connect);
        }
        self.open = true;
        self.inbound.clear();
        if let Some(reply) = self.replies.pop_front() {
            self.inbound.extend(reply);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Transport that records what it was asked to send.
pub struct FakeTransport {
    session_based: bool,
    connected: bool,
    reachable: bool,
    failing_keys: Vec<String>,
    sent: Vec<(String, i32)>,
    connects: usize,
    services: usize,
}

impl FakeTransport {
    fn build(session_based: bool, connected: bool, reachable: bool) -> Self {
        Self {
            session_based,
            connected,
            reachable,
            failing_keys: Vec::new(),
            sent: Vec::new(),
            connects: 0,
            services: 0,
        }
    }

    pub fn connected() -> Self {
        Self::build(true, true, true)
    }

    pub fn disconnected() -> Self {
        Self::build(true, false, true)
    }

    pub fn unreachable() -> Self {
        Self::build(true, false, false)
    }

    pub fn sessionless() -> Self {
        Self::build(false, true, true)
    }

    pub fn fail_key(&mut self, key: &str) {
        self.failing_keys.push(key.to_string());
    }

    pub fn sent(&self) -> Vec<(&str, i32)> {
        self.sent
            .iter()
            .map(|(key, value)| (key.as_str(), *value))
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.connects
    }

    pub fn services(&self) -> usize {
        self.services
    }
}

impl TelemetryTransport for FakeTransport {
    fn is_session_based(&self) -> bool {
        self.session_based
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, _now: embassy_time::Instant) -> Result<(), TelemetryError> {
        self.connects += 1;
        if !self.reachable {
            return Err(TelemetryError::Connect);
        }
        self.connected = true;
        Ok(())
    }

    async fn send_int(
        &mut self,
        key: &str,
        value: i32,
        _now: embassy_time::Instant,
    ) -> Result<(), TelemetryError> {
        if !self.connected {
            return Err(TelemetryError::NotConnected);
        }
        if self.failing_keys.iter().any(|k| k == key) {
            return Err(TelemetryError::Io(ErrorKind::BrokenPipe));
        }
        self.sent.push((key.to_string(), value));
        Ok(())
    }

    async fn service(&mut self, _now: embassy_time::Instant) -> Result<(), TelemetryError> {
        self.services += 1;
        Ok(())
    }
}

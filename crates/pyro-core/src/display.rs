//! Reading display
//!
//! Lays out the latest thermocouple reading on the 128x32 panel: the cold
//! junction temperature in small text along the top edge and the thermocouple
//! temperature in a large bold font beneath it.
//!
//! A freshly drawn frame is left on the glass for a settle window before
//! the next one replaces it. The window does not block: a reading that
//! arrives while the panel is settling is parked until the window has
//! passed. The next render replaces it; [`ReadingDisplay::service`] draws it
//! when no newer reading comes along. The control loop keeps running the
//! whole time.

use core::fmt::Write as _;

use embassy_time::{Duration, Instant};
use embedded_graphics::{
    mono_font::{
        MonoTextStyle,
        ascii::{FONT_6X10, FONT_9X18_BOLD},
    },
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use heapless::String;
use log::debug;

use crate::framebuffer::FrameBuffer;
use crate::sensors::ThermocoupleReadings;

pub use crate::framebuffer::{PANEL_HEIGHT_PX, PANEL_WIDTH_PX};

/// Top edge of the large temperature line
pub const TEMPERATURE_LINE_Y: i32 = 14;

/// Longest rendered line: `"cj: -2147483648c"`
pub type DisplayLine = String<16>;

/// A monochrome panel that can push a completed frame to the glass.
///
/// Drawing goes through the embedded-graphics [`DrawTarget`] half; some
/// controllers buffer that internally and only update the glass on
/// [`Panel::present`]. Panels that draw straight through implement it as a
/// no-op.
pub trait Panel: DrawTarget<Color = BinaryColor> {
    fn present(&mut self) -> Result<(), Self::Error>;
}

/// What [`ReadingDisplay::render`] did with a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The reading is on the panel now
    Drawn,
    /// The panel is settling; the reading will be drawn by `service`
    Deferred,
}

/// Text of the small top line
pub fn cold_junction_line(cold_junction: i32) -> DisplayLine {
    let mut line = DisplayLine::new();
    let _ = write!(line, "cj: {}c", cold_junction);
    line
}

/// Text of the large temperature line
pub fn temperature_line(temperature: i32) -> DisplayLine {
    let mut line = DisplayLine::new();
    let _ = write!(line, "{}c", temperature);
    line
}

/// Draw a reading in the panel layout. Does not clear first.
pub fn draw_readings<D>(display: &mut D, readings: &ThermocoupleReadings) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let small = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
    let large = MonoTextStyle::new(&FONT_9X18_BOLD, BinaryColor::On);

    Text::with_baseline(
        &cold_junction_line(readings.cold_junction),
        Point::zero(),
        small,
        Baseline::Top,
    )
    .draw(display)?;

    Text::with_baseline(
        &temperature_line(readings.temperature),
        Point::new(0, TEMPERATURE_LINE_Y),
        large,
        Baseline::Top,
    )
    .draw(display)?;

    Ok(())
}

pub struct ReadingDisplay<P> {
    panel: P,
    frame: FrameBuffer,
    settle: Duration,
    settle_until: Option<Instant>,
    pending: Option<ThermocoupleReadings>,
    shown: Option<ThermocoupleReadings>,
}

impl<P: Panel> ReadingDisplay<P> {
    pub fn new(panel: P, settle: Duration) -> Self {
        Self {
            panel,
            frame: FrameBuffer::new(),
            settle,
            settle_until: None,
            pending: None,
            shown: None,
        }
    }

    /// Draw the startup frame (both values zero) and start the first
    /// settle window.
    pub fn show_boot(&mut self, now: Instant) -> Result<(), P::Error> {
        self.pending = None;
        self.draw(now, ThermocoupleReadings::default())
    }

    /// Show a reading, or park it if the panel is still settling.
    ///
    /// A parked reading replaces any earlier parked one.
    pub fn render(
        &mut self,
        now: Instant,
        readings: &ThermocoupleReadings,
    ) -> Result<RenderOutcome, P::Error> {
        if self.is_settling(now) {
            self.pending = Some(*readings);
            return Ok(RenderOutcome::Deferred);
        }

        self.pending = None;
        self.draw(now, *readings)?;
        Ok(RenderOutcome::Drawn)
    }

    /// Draw the parked reading once the settle window has passed.
    ///
    /// Returns the reading that was drawn, if any.
    pub fn service(&mut self, now: Instant) -> Result<Option<ThermocoupleReadings>, P::Error> {
        if self.is_settling(now) {
            return Ok(None);
        }

        match self.pending.take() {
            Some(readings) => {
                self.draw(now, readings)?;
                Ok(Some(readings))
            }
            None => Ok(None),
        }
    }

    pub fn is_settling(&self, now: Instant) -> bool {
        self.settle_until.is_some_and(|until| now < until)
    }

    /// Reading currently on the panel
    pub fn shown(&self) -> Option<ThermocoupleReadings> {
        self.shown
    }

    /// Reading waiting for the settle window to pass
    pub fn pending(&self) -> Option<ThermocoupleReadings> {
        self.pending
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut P {
        &mut self.panel
    }

    fn draw(&mut self, now: Instant, readings: ThermocoupleReadings) -> Result<(), P::Error> {
        if self.shown != Some(readings) {
            let _ = self.frame.clear(BinaryColor::Off);
            let _ = draw_readings(&mut self.frame, &readings);
        }

        if let Err(e) = self.frame.flush(&mut self.panel) {
            // The panel may hold a partial frame now; resend all of it next time.
            self.frame.invalidate();
            return Err(e);
        }
        self.panel.present()?;

        debug!(
            "Display shows {} / {}",
            cold_junction_line(readings.cold_junction).as_str(),
            temperature_line(readings.temperature).as_str()
        );

        self.shown = Some(readings);
        self.settle_until = Some(now + self.settle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPanel;

    fn reading(temperature: i32, cold_junction: i32) -> ThermocoupleReadings {
        ThermocoupleReadings {
            temperature,
            cold_junction,
        }
    }

    fn expected_frame(readings: &ThermocoupleReadings) -> FrameBuffer {
        let mut frame = FrameBuffer::new();
        let _ = draw_readings(&mut frame, readings);
        frame
    }

    #[test]
    fn line_text_matches_field_layout() {
        assert_eq!(cold_junction_line(23).as_str(), "cj: 23c");
        assert_eq!(temperature_line(450).as_str(), "450c");
        assert_eq!(cold_junction_line(i32::MIN).as_str(), "cj: -2147483648c");
    }

    #[test]
    fn render_draws_both_lines() {
        let mut display = ReadingDisplay::new(RecordingPanel::new(), Duration::from_secs(2));
        let now = Instant::from_secs(100);

        let outcome = display.render(now, &reading(450, 23)).unwrap();
        assert_eq!(outcome, RenderOutcome::Drawn);
        assert_eq!(display.shown(), Some(reading(450, 23)));
        assert!(display.panel().matches(&expected_frame(&reading(450, 23))));
        assert_eq!(display.panel().presents(), 1);
    }

    #[test]
    fn temperature_sits_below_cold_junction() {
        let mut display = ReadingDisplay::new(RecordingPanel::new(), Duration::from_secs(2));
        display
            .render(Instant::from_secs(100), &reading(450, 23))
            .unwrap();

        let panel = display.panel();
        let top = embedded_graphics::primitives::Rectangle::new(
            Point::zero(),
            Size::new(PANEL_WIDTH_PX, TEMPERATURE_LINE_Y as u32),
        );
        let bottom = embedded_graphics::primitives::Rectangle::new(
            Point::new(0, TEMPERATURE_LINE_Y),
            Size::new(PANEL_WIDTH_PX, PANEL_HEIGHT_PX - TEMPERATURE_LINE_Y as u32),
        );
        assert!(panel.lit_pixels(&top) > 0);
        assert!(panel.lit_pixels(&bottom) > 0);
    }

    #[test]
    fn reading_during_settle_is_deferred() {
        let mut display = ReadingDisplay::new(RecordingPanel::new(), Duration::from_secs(2));
        let start = Instant::from_secs(100);

        display.render(start, &reading(450, 23)).unwrap();

        let early = start + Duration::from_millis(500);
        assert_eq!(
            display.render(early, &reading(451, 23)).unwrap(),
            RenderOutcome::Deferred
        );
        assert_eq!(
            display.render(early, &reading(452, 24)).unwrap(),
            RenderOutcome::Deferred
        );
        assert_eq!(display.shown(), Some(reading(450, 23)));
        assert_eq!(display.service(early).unwrap(), None);

        let settled = start + Duration::from_secs(2);
        assert_eq!(display.service(settled).unwrap(), Some(reading(452, 24)));
        assert_eq!(display.shown(), Some(reading(452, 24)));
        assert_eq!(display.pending(), None);
        assert!(display.panel().matches(&expected_frame(&reading(452, 24))));
    }

    #[test]
    fn boot_frame_shows_zeroes_and_starts_settle() {
        let mut display = ReadingDisplay::new(RecordingPanel::new(), Duration::from_secs(2));
        let boot = Instant::from_secs(1);

        display.show_boot(boot).unwrap();
        assert_eq!(display.shown(), Some(reading(0, 0)));
        assert!(display.is_settling(boot + Duration::from_millis(1999)));
        assert!(!display.is_settling(boot + Duration::from_secs(2)));
    }

    #[test]
    fn unchanged_reading_sends_no_pixels() {
        let mut display = ReadingDisplay::new(RecordingPanel::new(), Duration::from_millis(0));
        let now = Instant::from_secs(5);

        display.render(now, &reading(450, 23)).unwrap();
        let writes = display.panel().pixel_writes();

        display.render(now, &reading(450, 23)).unwrap();
        assert_eq!(display.panel().pixel_writes(), writes);
        assert_eq!(display.panel().presents(), 2);
    }

    #[test]
    fn panel_error_is_returned() {
        let mut display = ReadingDisplay::new(RecordingPanel::broken(), Duration::from_secs(2));
        assert!(display.render(Instant::from_secs(1), &reading(1, 1)).is_err());
        assert_eq!(display.shown(), None);
    }
}

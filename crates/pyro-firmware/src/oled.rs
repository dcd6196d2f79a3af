//! SSD1306 128x32 OLED as a [`Panel`]

use embedded_graphics::Pixel;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use embedded_hal::i2c::I2c;
use log::info;
use pyro_core::display::Panel;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::size::DisplaySize128x32;
use ssd1306::{I2CDisplayInterface, Ssd1306};

type Driver<I2C> =
    Ssd1306<I2CInterface<I2C>, DisplaySize128x32, BufferedGraphicsMode<DisplaySize128x32>>;

/// Error reported by the SSD1306 interface
pub type OledError<I2C> = <Driver<I2C> as DrawTarget>::Error;

/// The panel at I2C address 0x3C.
///
/// The driver keeps its own frame in RAM; drawing only touches that copy and
/// [`Panel::present`] pushes it over the bus.
pub struct OledPanel<I2C> {
    driver: Driver<I2C>,
}

impl<I2C: I2c> OledPanel<I2C> {
    pub fn new(i2c: I2C) -> Result<Self, OledError<I2C>> {
        let interface = I2CDisplayInterface::new(i2c);
        let mut driver = Ssd1306::new(interface, DisplaySize128x32, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        driver.init()?;
        info!("SSD1306 ready");
        Ok(Self { driver })
    }
}

impl<I2C: I2c> OriginDimensions for OledPanel<I2C> {
    fn size(&self) -> Size {
        self.driver.size()
    }
}

impl<I2C: I2c> DrawTarget for OledPanel<I2C> {
    type Color = BinaryColor;
    type Error = OledError<I2C>;

    fn draw_iter<It>(&mut self, pixels: It) -> Result<(), Self::Error>
    where
        It: IntoIterator<Item = Pixel<Self::Color>>,
    {
        self.driver.draw_iter(pixels)
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        self.driver.fill_solid(area, color)
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.driver.clear(color)
    }
}

impl<I2C: I2c> Panel for OledPanel<I2C> {
    fn present(&mut self) -> Result<(), Self::Error> {
        self.driver.flush()
    }
}

//! RAM framebuffer with per-pixel change detection.
//!
//! All display drawing targets this buffer instead of the panel. After
//! drawing completes, only the rectangular region containing changed pixels
//! is flushed to the panel.

use core::convert::Infallible;

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use log::debug;

/// Panel width in pixels
pub const PANEL_WIDTH_PX: u32 = 128;
/// Panel height in pixels
pub const PANEL_HEIGHT_PX: u32 = 32;

/// Total number of pixels in the framebuffer (128 x 32 = 4,096).
const PIXEL_COUNT: usize = PANEL_WIDTH_PX as usize * PANEL_HEIGHT_PX as usize;

/// Bounding box of pixels that have changed since the last flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirtyRect {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

impl DirtyRect {
    /// Expand the dirty region to include the given pixel coordinate.
    fn expand(&mut self, x: usize, y: usize) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Create a new dirty rect covering a single pixel.
    fn from_point(x: usize, y: usize) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn full() -> Self {
        Self {
            min_x: 0,
            min_y: 0,
            max_x: PANEL_WIDTH_PX as usize - 1,
            max_y: PANEL_HEIGHT_PX as usize - 1,
        }
    }
}

/// Monochrome framebuffer implementing `DrawTarget<Color = BinaryColor>`.
///
/// Statically sized (4 KiB of `BinaryColor`), so it needs no allocator.
pub struct FrameBuffer {
    pixels: [BinaryColor; PIXEL_COUNT],
    dirty: Option<DirtyRect>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// Create a blank framebuffer.
    ///
    /// The whole area starts dirty: whatever the panel shows at power-up
    /// (controller RAM garbage, a boot splash) gets overwritten on the first
    /// flush.
    pub const fn new() -> Self {
        Self {
            pixels: [BinaryColor::Off; PIXEL_COUNT],
            dirty: Some(DirtyRect {
                min_x: 0,
                min_y: 0,
                max_x: PANEL_WIDTH_PX as usize - 1,
                max_y: PANEL_HEIGHT_PX as usize - 1,
            }),
        }
    }

    /// Write a single pixel, expanding the dirty rect only if the color changed.
    #[inline]
    fn set_pixel(&mut self, x: usize, y: usize, color: BinaryColor) {
        let idx = y * PANEL_WIDTH_PX as usize + x;
        if self.pixels[idx] != color {
            self.pixels[idx] = color;
            match &mut self.dirty {
                Some(rect) => rect.expand(x, y),
                None => self.dirty = Some(DirtyRect::from_point(x, y)),
            }
        }
    }

    /// Read back a pixel. Out-of-bounds coordinates read as `Off`.
    pub fn pixel(&self, point: Point) -> BinaryColor {
        let (w, h) = (PANEL_WIDTH_PX as i32, PANEL_HEIGHT_PX as i32);
        if point.x < 0 || point.y < 0 || point.x >= w || point.y >= h {
            return BinaryColor::Off;
        }
        self.pixels[point.y as usize * PANEL_WIDTH_PX as usize + point.x as usize]
    }

    /// Number of lit pixels inside `area`
    pub fn lit_pixels(&self, area: &Rectangle) -> usize {
        area.points()
            .filter(|p| self.pixel(*p) == BinaryColor::On)
            .count()
    }

    /// Force the next flush to resend the whole frame.
    pub fn invalidate(&mut self) {
        self.dirty = Some(DirtyRect::full());
    }

    /// Region that the next flush would send, if any.
    pub fn dirty_area(&self) -> Option<Rectangle> {
        self.dirty.map(|rect| {
            Rectangle::new(
                Point::new(rect.min_x as i32, rect.min_y as i32),
                Size::new(
                    (rect.max_x - rect.min_x + 1) as u32,
                    (rect.max_y - rect.min_y + 1) as u32,
                ),
            )
        })
    }

    /// Flush the dirty region to a panel, then reset the dirty state.
    ///
    /// Only the bounding rectangle of changed pixels is sent via
    /// `fill_contiguous`. If nothing changed, this is a no-op.
    pub fn flush<D>(&mut self, display: &mut D) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = BinaryColor>,
    {
        let Some(area) = self.dirty_area() else {
            return Ok(());
        };
        self.dirty = None;

        debug!(
            "Flushing {}x{} dirty region at ({}, {})",
            area.size.width, area.size.height, area.top_left.x, area.top_left.y
        );

        let pixels = &self.pixels;
        let stride = PANEL_WIDTH_PX as usize;
        let min_x = area.top_left.x as usize;
        let width = area.size.width as usize;
        let rows = area.rows();
        let pixel_iter = rows.flat_map(move |y| {
            let row_start = y as usize * stride + min_x;
            pixels[row_start..row_start + width].iter().copied()
        });

        display.fill_contiguous(&area, pixel_iter)
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(PANEL_WIDTH_PX, PANEL_HEIGHT_PX)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let w = PANEL_WIDTH_PX as usize;
        let h = PANEL_HEIGHT_PX as usize;

        for Pixel(coord, color) in pixels {
            let x = coord.x;
            let y = coord.y;
            if x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h {
                self.set_pixel(x as usize, y as usize, color);
            }
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        let area = area.intersection(&self.bounding_box());
        let Some(bottom_right) = area.bottom_right() else {
            return Ok(());
        };

        for y in area.top_left.y..=bottom_right.y {
            for x in area.top_left.x..=bottom_right.x {
                self.set_pixel(x as usize, y as usize, color);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        let w = PANEL_WIDTH_PX as usize;
        let h = PANEL_HEIGHT_PX as usize;

        for y in 0..h {
            for x in 0..w {
                self.set_pixel(x, y, color);
            }
        }
        Ok(())
    }
}

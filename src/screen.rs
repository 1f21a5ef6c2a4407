use std::{fs::File, io::BufWriter, path::Path};

use crate::{color::Color, error::Result, rect::Rect};

/// The frame buffer everything is composited into.
pub struct Screen {
    pixels: Vec<Color>,
    width: usize,
    height: usize,
}

impl Screen {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            pixels: vec![Color::BLACK; width * height],
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Color> {
        (x < self.width && y < self.height).then(|| self.pixels[y * self.width + x])
    }

    pub fn viewport(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    /// Drawing context covering the whole screen.
    pub fn context(&mut self) -> DrawContext<'_> {
        let viewport = self.viewport();
        self.context_in(viewport)
    }

    /// Drawing context clipped to `viewport ∩ screen`; its coordinates are
    /// relative to the viewport origin.
    pub fn context_in(&mut self, viewport: Rect) -> DrawContext<'_> {
        let viewport = self.viewport().intersection(&viewport);
        DrawContext {
            pitch: self.width,
            pixels: &mut self.pixels,
            viewport,
        }
    }

    /// Writes the buffer as 8-bit RGBA, alpha as stored.
    pub fn write_png(&self, filename: impl AsRef<Path>) -> Result<()> {
        let file = File::create(filename.as_ref())?;
        let w = &mut BufWriter::new(file);

        let rgba_data: Vec<u8> = self
            .pixels
            .iter()
            .flat_map(|c| c.to_rgba())
            .collect();

        let mut encoder = png::Encoder::new(w, self.width as u32, self.height as u32);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder.write_header()?;
        writer.write_image_data(&rgba_data)?;

        Ok(())
    }
}

/// A clipped window onto a [`Screen`].
pub struct DrawContext<'a> {
    pixels: &'a mut [Color],
    pitch: usize,
    viewport: Rect,
}

impl<'a> DrawContext<'a> {
    /// The clip rectangle in screen coordinates.
    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn width(&self) -> i32 {
        self.viewport.w
    }

    pub fn height(&self) -> i32 {
        self.viewport.h
    }

    /// Local bounds, `(0, 0, width, height)`.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.viewport.w, self.viewport.h)
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        self.bounds().contains(x, y).then(|| {
            (self.viewport.y + y) as usize * self.pitch + (self.viewport.x + x) as usize
        })
    }

    pub fn get(&self, x: i32, y: i32) -> Option<Color> {
        self.index(x, y).map(|i| self.pixels[i])
    }

    /// Writes without blending.
    #[inline]
    pub fn put(&mut self, x: i32, y: i32, c: Color) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = c;
        }
    }

    /// The visible part of row `y`, `width()` pixels long.
    pub fn row_mut(&mut self, y: i32) -> Option<&mut [Color]> {
        let start = self.index(0, y)?;
        Some(&mut self.pixels[start..start + self.viewport.w as usize])
    }

    /// A narrower context; `rect` is in this context's coordinates.
    pub fn sub_context(&mut self, rect: Rect) -> DrawContext<'_> {
        let viewport = self
            .viewport
            .intersection(&rect.translated(self.viewport.x, self.viewport.y));
        DrawContext {
            pixels: &mut *self.pixels,
            pitch: self.pitch,
            viewport,
        }
    }

    pub fn draw_point(&mut self, x: i32, y: i32, c: Color) {
        if c.a() == 0 {
            return;
        }
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = if c.a() == 255 { c } else { c.blend_over(self.pixels[i]) };
        }
    }

    /// Bresenham line, both endpoints inclusive.
    pub fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, c: Color) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let (mut x, mut y) = (x0, y0);
        let mut err = dx + dy;

        loop {
            self.draw_point(x, y, c);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Alpha-blended fill.
    pub fn draw_rect(&mut self, rect: Rect, c: Color) {
        for (x, y) in self.bounds().intersection(&rect).points() {
            self.draw_point(x, y, c);
        }
    }

    /// Overwriting fill.
    pub fn clear_rect(&mut self, rect: Rect, c: Color) {
        let r = self.bounds().intersection(&rect);
        for y in r.top()..r.bottom() {
            if let Some(row) = self.row_mut(y) {
                row[r.left() as usize..r.right() as usize].fill(c);
            }
        }
    }

    pub fn clear(&mut self, c: Color) {
        self.clear_rect(self.bounds(), c);
    }
}

//! In-memory bitmaps: palette-indexed and 32-bit.

use std::io::Cursor;

use ::image::{
    codecs::bmp::{BmpDecoder, BmpEncoder},
    ExtendedColorType, ImageDecoder, Limits,
};
use tracing::warn;

use crate::{
    color::Color,
    error::{Error, Result},
    palette::Palette,
    rect::Rect,
    resources::ResourceManager,
    screen::{DrawContext, Screen},
};

/// Common drawing surface of both image kinds.
pub trait Image {
    fn width(&self) -> usize;
    fn height(&self) -> usize;

    /// Draws `inner` (a rectangle in image space) with its top-left at
    /// `(x, y)`. Pixels matching `colorkey` are skipped.
    fn draw_partial(&self, ctx: &mut DrawContext, x: i32, y: i32, inner: Rect, colorkey: Option<Color>);

    /// Copies `inner` verbatim, no blending and no colour key.
    fn blit_partial(&self, ctx: &mut DrawContext, x: i32, y: i32, inner: Rect);

    fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width() as i32, self.height() as i32)
    }

    fn draw(&self, ctx: &mut DrawContext, x: i32, y: i32, colorkey: Option<Color>) {
        self.draw_partial(ctx, x, y, self.bounds(), colorkey);
    }

    fn blit(&self, ctx: &mut DrawContext, x: i32, y: i32) {
        self.blit_partial(ctx, x, y, self.bounds());
    }
}

/// Clips a copy of `inner` placed at `(x, y)` against the image bounds and
/// the destination. Returns equally sized `(destination, source)` rectangles.
fn clip_copy(dest: Rect, x: i32, y: i32, inner: Rect, image: Rect) -> Option<(Rect, Rect)> {
    let src = inner.intersection(&image);
    let (ox, oy) = (x - inner.x, y - inner.y);
    let dst = src.translated(ox, oy).intersection(&dest);
    if dst.is_empty() {
        return None;
    }
    Some((dst, dst.translated(-ox, -oy)))
}

/// Shifts a `width`×`height` buffer so that the value at `(x, y)` ends up at
/// `(x + dx, y + dy)`. The vacated strip keeps its old contents. Shifts of a
/// whole dimension or more do nothing.
pub fn move_in_place<T: Copy>(buf: &mut [T], width: usize, height: usize, dx: i32, dy: i32) {
    let (w, h) = (width as i32, height as i32);
    if (dx == 0 && dy == 0) || dx.abs() >= w || dy.abs() >= h {
        return;
    }

    let dst = Rect::new(dx, dy, w, h).intersection(&Rect::new(0, 0, w, h));
    let backwards = w * dy + dx >= 0;
    let len = dst.w as usize;

    let mut copy_row = |y: i32| {
        let to = (y * w + dst.x) as usize;
        let from = ((y - dy) * w + dst.x - dx) as usize;
        buf.copy_within(from..from + len, to);
    };

    if backwards {
        (dst.top()..dst.bottom()).rev().for_each(&mut copy_row);
    } else {
        (dst.top()..dst.bottom()).for_each(&mut copy_row);
    }
}

pub struct ImagePaletted {
    pixels: Vec<u8>,
    width: usize,
    height: usize,
    palette: Palette,
}

impl ImagePaletted {
    /// Blank image with a grey ramp palette.
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_palette(width, height, Palette::grayscale())
    }

    pub fn with_palette(width: usize, height: usize, palette: Palette) -> Self {
        Self {
            pixels: vec![0; width * height],
            width,
            height,
            palette,
        }
    }

    pub fn load(resources: &ResourceManager, path: &str) -> Result<Self> {
        let data = resources.read_file(path)?;
        Self::from_bmp(&data).map_err(|e| {
            warn!("couldn't load \"{}\": {}", path, e);
            e
        })
    }

    /// Decodes a paletted BMP, keeping the palette indices as they are.
    pub fn from_bmp(data: &[u8]) -> Result<Self> {
        let mut decoder = BmpDecoder::new(Cursor::new(data))?;
        decoder.set_indexed_color(true);
        let mut limits = Limits::default();
        decoder.set_limits(limits.clone())?;
        limits.reserve(decoder.total_bytes())?;

        let Some(colors) = decoder.get_palette() else {
            return Err(Error::format("image is not paletted"));
        };
        let mut palette = Palette::new();
        for (i, &[r, g, b]) in colors.iter().take(256).enumerate() {
            palette.set(i, Color::rgb(r, g, b));
        }

        let (width, height) = decoder.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::format(format!("invalid BMP size {}x{}", width, height)));
        }
        let (width, height) = (width as usize, height as usize);
        let mut pixels = vec![0u8; width * height];
        decoder.read_image(&mut pixels)?;

        Ok(Self {
            pixels,
            width,
            height,
            palette,
        })
    }

    /// Encodes as an uncompressed 8-bit BMP with the full palette.
    pub fn to_bmp(&self) -> Result<Vec<u8>> {
        let (Ok(width), Ok(height)) = (u32::try_from(self.width), u32::try_from(self.height)) else {
            return Err(Error::format(format!("image too large: {}x{}", self.width, self.height)));
        };
        let colors: Vec<[u8; 3]> = self.palette.as_slice().iter().map(|c| [c.r(), c.g(), c.b()]).collect();

        let mut out = Vec::new();
        BmpEncoder::new(&mut out).encode_with_palette(
            &self.pixels,
            width,
            height,
            ExtendedColorType::L8,
            Some(&colors),
        )?;
        Ok(out)
    }

    /// Palette index at `(x, y)`, 0 outside the image.
    pub fn pixel_at(&self, x: usize, y: usize) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.pixels[y * self.width + x]
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn set_size(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.pixels.resize(width * height, 0);
    }

    pub fn move_in_place(&mut self, dx: i32, dy: i32) {
        move_in_place(&mut self.pixels, self.width, self.height, dx, dy);
    }
}

impl Image for ImagePaletted {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn draw_partial(&self, ctx: &mut DrawContext, x: i32, y: i32, inner: Rect, colorkey: Option<Color>) {
        let Some((dst, src)) = clip_copy(ctx.bounds(), x, y, inner, self.bounds()) else {
            return;
        };

        for row in 0..dst.h {
            let Some(line) = ctx.row_mut(dst.y + row) else {
                continue;
            };
            let from = (src.y + row) as usize * self.width + src.x as usize;
            let source = &self.pixels[from..from + src.w as usize];
            let target = &mut line[dst.x as usize..dst.right() as usize];
            for (d, &index) in target.iter_mut().zip(source) {
                let c = self.palette[index];
                if colorkey.map_or(true, |key| !c.matches_key(key)) {
                    *d = c;
                }
            }
        }
    }

    fn blit_partial(&self, ctx: &mut DrawContext, x: i32, y: i32, inner: Rect) {
        self.draw_partial(ctx, x, y, inner, None);
    }
}

pub struct ImageTruecolor {
    pixels: Vec<Color>,
    width: usize,
    height: usize,
}

impl ImageTruecolor {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            pixels: vec![Color::TRANSPARENT; width * height],
            width,
            height,
        }
    }

    pub fn load(resources: &ResourceManager, path: &str) -> Result<Self> {
        let data = resources.read_file(path)?;
        Self::from_bmp(&data).map_err(|e| {
            warn!("couldn't load \"{}\": {}", path, e);
            e
        })
    }

    /// Decodes any BMP the `image` crate understands into 32-bit colour.
    pub fn from_bmp(data: &[u8]) -> Result<Self> {
        let decoded = ::image::load_from_memory_with_format(data, ::image::ImageFormat::Bmp)?.to_rgba8();
        let (width, height) = (decoded.width() as usize, decoded.height() as usize);
        let pixels = decoded
            .pixels()
            .map(|p| Color::new(p[0], p[1], p[2], p[3]))
            .collect();
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Copies `rect` (clipped to the screen) out of `screen`.
    pub fn from_screen(screen: &Screen, rect: Rect) -> Self {
        let clip = screen.viewport().intersection(&rect);
        let pixels = clip
            .points()
            .map(|(x, y)| screen.pixels()[y as usize * screen.width() + x as usize])
            .collect();
        Self {
            pixels,
            width: clip.w as usize,
            height: clip.h as usize,
        }
    }

    pub fn pixel_at(&self, x: usize, y: usize) -> Option<Color> {
        (x < self.width && y < self.height).then(|| self.pixels[y * self.width + x])
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Color] {
        &mut self.pixels
    }

    pub fn set_size(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.pixels.resize(width * height, Color::TRANSPARENT);
    }

    pub fn move_in_place(&mut self, dx: i32, dy: i32) {
        move_in_place(&mut self.pixels, self.width, self.height, dx, dy);
    }
}

impl Image for ImageTruecolor {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn draw_partial(&self, ctx: &mut DrawContext, x: i32, y: i32, inner: Rect, colorkey: Option<Color>) {
        let Some((dst, src)) = clip_copy(ctx.bounds(), x, y, inner, self.bounds()) else {
            return;
        };

        for row in 0..dst.h {
            let Some(line) = ctx.row_mut(dst.y + row) else {
                continue;
            };
            let from = (src.y + row) as usize * self.width + src.x as usize;
            let source = &self.pixels[from..from + src.w as usize];
            let target = &mut line[dst.x as usize..dst.right() as usize];
            for (d, &c) in target.iter_mut().zip(source) {
                if colorkey.map_or(true, |key| !c.matches_key(key)) {
                    *d = c.blend_over(*d);
                }
            }
        }
    }

    fn blit_partial(&self, ctx: &mut DrawContext, x: i32, y: i32, inner: Rect) {
        let Some((dst, src)) = clip_copy(ctx.bounds(), x, y, inner, self.bounds()) else {
            return;
        };

        for row in 0..dst.h {
            let Some(line) = ctx.row_mut(dst.y + row) else {
                continue;
            };
            let from = (src.y + row) as usize * self.width + src.x as usize;
            line[dst.x as usize..dst.right() as usize]
                .copy_from_slice(&self.pixels[from..from + src.w as usize]);
        }
    }
}

use std::io::Cursor;

use tracing::warn;

use crate::{
    bytes_ext::ReadBytesExt,
    color::Color,
    error::{Error, Result},
    palette::Palette,
    rect::Rect,
    resources::ResourceManager,
    rle::{self, RleFormat, RleWalker, Span},
    screen::DrawContext,
};

/// Set in the trailing frame count when a palette precedes the frames.
pub const SPRITE_PALETTE_FLAG: u32 = 0x8000_0000;

/// Largest frame width or height accepted from a file.
pub const MAX_FRAME_SIZE: u32 = 0x1_0000;

pub struct SpriteFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl SpriteFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A `.256` or `.16a` sprite. Frames stay RLE encoded and are decoded
/// straight into the destination on every draw.
pub struct Sprite {
    format: RleFormat,
    frames: Vec<SpriteFrame>,
    palette: Option<Palette>,
}

impl Sprite {
    /// Checks every frame before accepting it.
    pub fn new(format: RleFormat, frames: Vec<SpriteFrame>, palette: Option<Palette>) -> Result<Self> {
        for (i, frame) in frames.iter().enumerate() {
            if frame.width > MAX_FRAME_SIZE || frame.height > MAX_FRAME_SIZE {
                return Err(Error::format(format!(
                    "frame {}: invalid size {}x{}",
                    i, frame.width, frame.height
                )));
            }
            rle::validate(format, &frame.data, frame.width)
                .map_err(|e| Error::format(format!("frame {}: {}", i, e)))?;
        }
        Ok(Self {
            format,
            frames,
            palette,
        })
    }

    /// Loads a sprite, picking the format from the extension.
    pub fn load(resources: &ResourceManager, path: &str) -> Result<Self> {
        let format = format_for_path(path)
            .ok_or_else(|| Error::format(format!("\"{}\" is not a sprite file", path)))?;
        let data = resources.read_file(path)?;
        Self::from_bytes(format, &data).map_err(|e| {
            warn!("couldn't load \"{}\": {}", path, e);
            e
        })
    }

    pub fn from_bytes(format: RleFormat, data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::format("sprite file is too short"));
        }
        let trailer = data.len() - 4;
        let mut r = Cursor::new(data);
        r.set_position(trailer as u64);
        let count = r.read_le_u32()?;
        let has_palette = count & SPRITE_PALETTE_FLAG != 0;
        let count = count & !SPRITE_PALETTE_FLAG;

        let mut r = Cursor::new(&data[..trailer]);
        let palette = if has_palette {
            Some(Palette::read_from(&mut r)?)
        } else {
            None
        };

        let mut frames = Vec::with_capacity(count.min(1024) as usize);
        for i in 0..count {
            let width = r.read_le_u32()?;
            let height = r.read_le_u32()?;
            let len = r.read_le_u32()? as usize;
            let start = r.position() as usize;
            let Some(blob) = data[..trailer].get(start..start + len) else {
                return Err(Error::format(format!(
                    "frame {} claims {} bytes, only {} left",
                    i,
                    len,
                    trailer.saturating_sub(start)
                )));
            };
            r.set_position((start + len) as u64);
            frames.push(SpriteFrame::new(width, height, blob.to_vec()));
        }

        Self::new(format, frames, palette)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Vec::new();
        let mut count = self.frames.len() as u32;
        if let Some(palette) = &self.palette {
            count |= SPRITE_PALETTE_FLAG;
            for c in palette.as_slice() {
                w.extend_from_slice(&c.0.to_le_bytes());
            }
        }
        for frame in &self.frames {
            w.extend_from_slice(&frame.width.to_le_bytes());
            w.extend_from_slice(&frame.height.to_le_bytes());
            w.extend_from_slice(&(frame.data.len() as u32).to_le_bytes());
            w.extend_from_slice(&frame.data);
        }
        w.extend_from_slice(&count.to_le_bytes());
        w
    }

    pub fn format(&self) -> RleFormat {
        self.format
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> Option<&SpriteFrame> {
        self.frames.get(index)
    }

    /// Frame width, 0 for an unknown frame.
    pub fn width(&self, index: usize) -> u32 {
        self.frame(index).map_or(0, |f| f.width)
    }

    pub fn height(&self, index: usize) -> u32 {
        self.frame(index).map_or(0, |f| f.height)
    }

    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref()
    }

    fn visible_frame(&self, ctx: &DrawContext, x: i32, y: i32, index: usize) -> Option<&SpriteFrame> {
        let frame = self.frames.get(index)?;
        let area = Rect::new(x, y, frame.width as i32, frame.height as i32);
        ctx.bounds().intersects(&area).then_some(frame)
    }

    /// Draws frame `index` with its top-left corner at `(x, y)`. Unknown
    /// frames draw nothing.
    pub fn draw(&self, ctx: &mut DrawContext, x: i32, y: i32, index: usize, palette: &[Color; 256]) {
        let Some(frame) = self.visible_frame(ctx, x, y, index) else {
            return;
        };

        for span in RleWalker::new(self.format, &frame.data, frame.width).map_while(|s| s.ok()) {
            let Span::Pixels { x: px, y: py, data } = span else {
                continue;
            };
            let row_y = y + py as i32;
            if row_y >= ctx.height() {
                break;
            }
            let width = ctx.width();
            let Some(row) = ctx.row_mut(row_y) else {
                continue;
            };

            let start = x + px as i32;
            match self.format {
                RleFormat::Indexed256 => {
                    for (i, &index) in data.iter().enumerate() {
                        let dx = start + i as i32;
                        if (0..width).contains(&dx) {
                            row[dx as usize] = palette[index as usize].with_alpha(255);
                        }
                    }
                }
                RleFormat::Alpha16 => {
                    for (i, word) in data.chunks_exact(2).enumerate() {
                        let dx = start + i as i32;
                        if (0..width).contains(&dx) {
                            let px = u16::from_le_bytes([word[0], word[1]]) >> 1;
                            let alpha = ((px & 0x0F00) >> 8) as u8;
                            let c = palette[(px & 0xFF) as usize];
                            row[dx as usize] = c.blend16_over(alpha, row[dx as usize]);
                        }
                    }
                }
            }
        }
    }

    /// Darkens the ground under frame `index` as a slanted shadow: each row
    /// is shifted right by an amount falling linearly from `max_offset` on
    /// the top row to 0 on the bottom row, and covered pixels have every
    /// channel divided by `power`. Only `.256` sprites cast shadows.
    pub fn draw_shadow(&self, ctx: &mut DrawContext, x: i32, y: i32, index: usize, max_offset: i32, power: u8) {
        if self.format != RleFormat::Indexed256 {
            return;
        }
        let Some(frame) = self.frames.get(index) else {
            return;
        };
        let spread = Rect::new(
            x.min(x + max_offset),
            y,
            frame.width as i32 + max_offset.abs(),
            frame.height as i32,
        );
        if !ctx.bounds().intersects(&spread) {
            return;
        }

        let last_row = (frame.height as i32 - 1).max(1);
        for span in RleWalker::new(self.format, &frame.data, frame.width).map_while(|s| s.ok()) {
            let Span::Pixels { x: px, y: py, data } = span else {
                continue;
            };
            let row_y = y + py as i32;
            if row_y >= ctx.height() {
                break;
            }
            let width = ctx.width();
            let Some(row) = ctx.row_mut(row_y) else {
                continue;
            };

            let skew = max_offset * (last_row - py as i32).max(0) / last_row;
            let start = x + px as i32 + skew;
            for dx in (start..start + data.len() as i32).filter(|dx| (0..width).contains(dx)) {
                row[dx as usize] = row[dx as usize].darkened(power);
            }
        }
    }
}

/// `.256` and `.16a` by extension, case-insensitively.
pub fn format_for_path(path: &str) -> Option<RleFormat> {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".256") {
        Some(RleFormat::Indexed256)
    } else if lower.ends_with(".16a") {
        Some(RleFormat::Alpha16)
    } else {
        None
    }
}

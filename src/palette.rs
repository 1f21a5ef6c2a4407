use std::io::Read;

use crate::{bytes_ext::ReadBytesExt, color::Color};

pub const PALETTE_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette([Color; PALETTE_SIZE]);

impl Palette {
    pub fn new() -> Self {
        Palette([Color::BLACK; PALETTE_SIZE])
    }

    /// Opaque grey ramp, index `i` maps to `(i, i, i)`.
    pub fn grayscale() -> Self {
        let mut pal = Self::new();
        for i in 0..PALETTE_SIZE {
            pal.set(i, Color::rgb(i as u8, i as u8, i as u8));
        }
        pal
    }

    /// Builds a palette from up to 256 colours; missing entries stay black.
    pub fn from_colors(colors: &[Color]) -> Self {
        let mut pal = Self::new();
        for (dst, &src) in pal.0.iter_mut().zip(colors) {
            *dst = src;
        }
        pal
    }

    /// Reads 256 little-endian 32-bit entries.
    pub fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let mut pal = Self::new();
        for c in pal.0.iter_mut() {
            *c = Color(r.read_le_u32()?);
        }
        Ok(pal)
    }

    pub fn clear(&mut self) {
        self.0 = [Color::BLACK; PALETTE_SIZE];
    }

    pub fn get(&self, i: usize) -> Color {
        self.0[i]
    }

    pub fn set(&mut self, i: usize, c: Color) {
        self.0[i] = c;
    }

    pub fn as_slice(&self) -> &[Color; PALETTE_SIZE] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [Color; PALETTE_SIZE] {
        &mut self.0
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Index<u8> for Palette {
    type Output = Color;

    fn index(&self, index: u8) -> &Color {
        &self.0[index as usize]
    }
}

/// A 32-bit colour stored as `0xAARRGGBB` (B, G, R, A in memory order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color(pub u32);

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color(0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self((a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32)
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub const fn r(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn g(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn b(self) -> u8 {
        self.0 as u8
    }

    pub const fn a(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self(self.0 & 0x00FF_FFFF | (a as u32) << 24)
    }

    /// Compares colours with the low nibble of every channel masked off.
    pub const fn matches_key(self, key: Color) -> bool {
        self.0 & 0xF0F0F0 == key.0 & 0xF0F0F0
    }

    pub fn to_rgba(self) -> [u8; 4] {
        [self.r(), self.g(), self.b(), self.a()]
    }

    /// Composites `self` over `background` using `self`'s alpha. The result is opaque.
    #[inline]
    pub fn blend_over(self, background: Color) -> Color {
        let a = self.a() as u32;
        let mix = |s: u8, d: u8| (s as u32 * a / 255 + d as u32 * (255 - a) / 255) as u8;
        Color::rgb(
            mix(self.r(), background.r()),
            mix(self.g(), background.g()),
            mix(self.b(), background.b()),
        )
    }

    /// Composites `self` over `background` with a 4-bit alpha (0 transparent, 15 opaque).
    #[inline]
    pub fn blend16_over(self, alpha: u8, background: Color) -> Color {
        let a = alpha.min(15) as u32;
        let mix = |s: u8, d: u8| ((s as u32 * a + d as u32 * (15 - a)) / 15) as u8;
        Color::rgb(
            mix(self.r(), background.r()),
            mix(self.g(), background.g()),
            mix(self.b(), background.b()),
        )
    }

    /// Scales every colour channel by `factor / 255`, keeping alpha.
    #[inline]
    pub fn scaled(self, factor: u8) -> Color {
        let f = factor as u32;
        let scale = |c: u8| (c as u32 * f / 255) as u8;
        Color::new(scale(self.r()), scale(self.g()), scale(self.b()), self.a())
    }

    /// Divides every colour channel by `power`, keeping alpha.
    #[inline]
    pub fn darkened(self, power: u8) -> Color {
        let p = power.max(1);
        Color::new(self.r() / p, self.g() / p, self.b() / p, self.a())
    }
}

impl From<u32> for Color {
    fn from(value: u32) -> Self {
        Color(value)
    }
}

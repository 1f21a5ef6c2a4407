use crate::{color::Color, palette::Palette};

/// Number of generated light levels.
pub const LEVEL_COUNT: usize = 65;
/// Level at which neutral parameters reproduce the base palette.
pub const NEUTRAL_LEVEL: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Params {
    tint: Color,
    brightness: u8,
    contrast: u8,
}

/// A base palette expanded into [`LEVEL_COUNT`] brightness steps, so lit
/// pixels are a table lookup.
#[derive(Debug, Clone, Default)]
pub struct CompoundPalette {
    base: Option<Palette>,
    levels: Vec<[Color; 256]>,
    last: Option<Params>,
}

impl CompoundPalette {
    pub fn new(base: &Palette) -> Self {
        let mut pal = Self::default();
        pal.set_base_palette(base);
        pal
    }

    /// Replaces the base palette; the next [`update_palettes`](Self::update_palettes) regenerates.
    pub fn set_base_palette(&mut self, base: &Palette) {
        self.base = Some(base.clone());
        self.last = None;
    }

    pub fn base_palette(&self) -> Option<&Palette> {
        self.base.as_ref()
    }

    /// Regenerates every level unless the parameters match the previous call.
    /// Returns whether anything was generated.
    pub fn update_palettes(&mut self, tint: Color, brightness: u8, contrast: u8) -> bool {
        let params = Params {
            tint,
            brightness,
            contrast,
        };
        if self.last == Some(params) {
            return false;
        }
        let Some(base) = &self.base else {
            return false;
        };

        self.levels.clear();
        self.levels.reserve(LEVEL_COUNT);
        for level in 0..LEVEL_COUNT as i32 {
            let mut generated = [Color::BLACK; 256];
            for (dst, src) in generated.iter_mut().zip(base.as_slice()) {
                let channel = |c: u8, t: u8| {
                    let mut c = c as i32 * t as i32 / 255;
                    c = (c + 127) * contrast as i32 / 255 - 127;
                    c = c * brightness as i32 / 255;
                    if level < 31 {
                        c = c * level / 31;
                    } else if level > 32 {
                        c += c * (level - 31) * 2 / 31;
                    }
                    c.clamp(0, 255) as u8
                };
                *dst = Color::rgb(
                    channel(src.r(), tint.r()),
                    channel(src.g(), tint.g()),
                    channel(src.b(), tint.b()),
                );
            }
            self.levels.push(generated);
        }

        self.last = Some(params);
        true
    }

    /// Palette for light `level`, `None` before generation or past the last level.
    pub fn palette(&self, level: usize) -> Option<&[Color; 256]> {
        self.levels.get(level)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn base() -> Palette {
        let mut pal = Palette::grayscale();
        pal.set(1, Color::rgb(200, 100, 50));
        pal
    }

    #[test]
    fn neutral_levels_are_identity() {
        let mut cp = CompoundPalette::new(&base());
        assert!(cp.palette(NEUTRAL_LEVEL).is_none());
        cp.update_palettes(Color::WHITE, 255, 255);

        assert_eq!(cp.palette(NEUTRAL_LEVEL).unwrap(), base().as_slice());
        assert_eq!(cp.palette(31).unwrap(), base().as_slice());
        assert_eq!(cp.palette(0).unwrap()[1], Color::BLACK);
        assert_eq!(cp.palette(64).unwrap()[255], Color::WHITE);
        assert!(cp.palette(LEVEL_COUNT).is_none());
    }

    #[test]
    fn update_is_memoized() {
        let mut cp = CompoundPalette::new(&base());
        assert!(cp.update_palettes(Color::WHITE, 255, 255));
        assert!(!cp.update_palettes(Color::WHITE, 255, 255));
        assert!(cp.update_palettes(Color::WHITE, 128, 255));

        cp.set_base_palette(&Palette::grayscale());
        assert!(cp.update_palettes(Color::WHITE, 128, 255));
        assert!(CompoundPalette::default().palette(0).is_none());
        assert!(!CompoundPalette::default().update_palettes(Color::WHITE, 255, 255));
    }

    #[test]
    fn tint_scales_channels() {
        let mut cp = CompoundPalette::new(&base());
        cp.update_palettes(Color::rgb(255, 0, 128), 255, 255);
        let c = cp.palette(NEUTRAL_LEVEL).unwrap()[1];
        assert_eq!((c.r(), c.g(), c.b()), (200, 0, 25));
    }

    proptest! {
        #[test]
        fn levels_never_get_darker_upwards(
            r in any::<u8>(), g in any::<u8>(), b in any::<u8>(),
            tr in any::<u8>(), tg in any::<u8>(), tb in any::<u8>(),
            brightness in any::<u8>(), contrast in any::<u8>(),
        ) {
            let mut pal = Palette::new();
            pal.set(0, Color::rgb(r, g, b));
            let mut cp = CompoundPalette::new(&pal);
            cp.update_palettes(Color::rgb(tr, tg, tb), brightness, contrast);

            for level in 1..LEVEL_COUNT {
                let lo = cp.palette(level - 1).unwrap()[0];
                let hi = cp.palette(level).unwrap()[0];
                prop_assert!(lo.r() <= hi.r() && lo.g() <= hi.g() && lo.b() <= hi.b());
                prop_assert_eq!(hi.a(), 255);
            }
            let zero = cp.palette(0).unwrap()[0];
            prop_assert_eq!((zero.r(), zero.g(), zero.b()), (0, 0, 0));
        }
    }
}

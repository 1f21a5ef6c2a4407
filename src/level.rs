//! ALM level files: map dimensions, lighting and the per-node layers.

use std::io::Read;

use tracing::{debug, warn};

use crate::{
    bytes_ext::{ReadBytesExt, WriteBytesExt},
    error::{Error, Result},
    resources::ResourceManager,
    stream::{MemoryStream, Stream},
};

pub const ALM_SIGNATURE: u32 = 0x0052_374D;
const HEADER_SIZE: u32 = 0x14;
const NAME_SIZE: usize = 0x40;
const AUTHOR_SIZE: usize = 0x200;

const SECTION_INFO: u32 = 0;
const SECTION_TILES: u32 = 1;
const SECTION_HEIGHTS: u32 = 2;
const SECTION_OBSTACLES: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlmInfo {
    pub width: u32,
    pub height: u32,
    pub solar_angle: f32,
    pub time_of_day: u32,
    pub darkness: u32,
    pub contrast: u32,
    pub use_tiles: u32,
    pub count_players: u32,
    pub count_structures: u32,
    pub count_units: u32,
    pub count_triggers: u32,
    pub count_sacks: u32,
    pub count_groups: u32,
    pub count_inns: u32,
    pub count_shops: u32,
    pub count_pointers: u32,
    pub count_music: u32,
    pub name: String,
    pub recommended_players: u32,
    pub level: u32,
    pub reserved: [u32; 2],
    pub author: String,
}

impl AlmInfo {
    fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let mut info = AlmInfo {
            width: r.read_le_u32()?,
            height: r.read_le_u32()?,
            solar_angle: r.read_le_f32()?,
            time_of_day: r.read_le_u32()?,
            darkness: r.read_le_u32()?,
            contrast: r.read_le_u32()?,
            use_tiles: r.read_le_u32()?,
            ..Default::default()
        };
        for count in [
            &mut info.count_players,
            &mut info.count_structures,
            &mut info.count_units,
            &mut info.count_triggers,
            &mut info.count_sacks,
            &mut info.count_groups,
            &mut info.count_inns,
            &mut info.count_shops,
            &mut info.count_pointers,
            &mut info.count_music,
        ] {
            *count = r.read_le_u32()?;
        }
        info.name = r.read_fixed_str(NAME_SIZE)?;
        info.recommended_players = r.read_le_u32()?;
        info.level = r.read_le_u32()?;
        info.reserved = [r.read_le_u32()?, r.read_le_u32()?];
        info.author = r.read_fixed_str(AUTHOR_SIZE)?;
        Ok(info)
    }

    fn write_to(&self, w: &mut Vec<u8>) -> std::io::Result<()> {
        w.write_le_u32(self.width)?;
        w.write_le_u32(self.height)?;
        w.write_le_f32(self.solar_angle)?;
        for v in [
            self.time_of_day,
            self.darkness,
            self.contrast,
            self.use_tiles,
            self.count_players,
            self.count_structures,
            self.count_units,
            self.count_triggers,
            self.count_sacks,
            self.count_groups,
            self.count_inns,
            self.count_shops,
            self.count_pointers,
            self.count_music,
        ] {
            w.write_le_u32(v)?;
        }
        w.write_fixed_str(&self.name, NAME_SIZE)?;
        w.write_le_u32(self.recommended_players)?;
        w.write_le_u32(self.level)?;
        w.write_le_u32(self.reserved[0])?;
        w.write_le_u32(self.reserved[1])?;
        w.write_fixed_str(&self.author, AUTHOR_SIZE)
    }
}

/// A parsed level. Layers are row-major, `width * height` long.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlmLevel {
    pub info: AlmInfo,
    pub tiles: Vec<u16>,
    pub heights: Vec<i8>,
    pub obstacles: Vec<u8>,
}

impl AlmLevel {
    /// Blank level: tile 0, flat, no obstacles.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let n = node_count(width, height)?;
        Ok(Self {
            info: AlmInfo {
                width,
                height,
                ..Default::default()
            },
            tiles: vec![0; n],
            heights: vec![0; n],
            obstacles: vec![0; n],
        })
    }

    pub fn load(resources: &ResourceManager, path: &str) -> Result<Self> {
        let data = resources.read_file(path)?;
        Self::parse(data).map_err(|e| {
            warn!("couldn't load \"{}\": {}", path, e);
            e
        })
    }

    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mut ms = MemoryStream::from_vec(data);

        let signature = ms.read_le_u32()?;
        let header_size = ms.read_le_u32()?;
        ms.skip(4);
        let section_count = ms.read_le_u32()?;
        ms.skip(4);

        if signature != ALM_SIGNATURE {
            return Err(Error::InvalidSignature {
                what: "ALM",
                found: signature,
            });
        }
        if header_size != HEADER_SIZE {
            return Err(Error::format(format!("invalid ALM header size 0x{:08X}", header_size)));
        }
        if section_count < 3 {
            return Err(Error::format(format!("invalid ALM section count {}", section_count)));
        }

        let mut level = AlmLevel::default();
        let mut info_loaded = false;

        for _ in 0..section_count {
            ms.skip(8);
            let size = ms.read_le_u32()? as u64;
            let id = ms.read_le_u32()?;
            ms.skip(4);
            let start = ms.position();

            if id != SECTION_INFO && id <= SECTION_OBSTACLES && !info_loaded {
                return Err(Error::format(format!("ALM section {} before info", id)));
            }
            let nodes = node_count(level.info.width, level.info.height)?;

            match id {
                SECTION_INFO => {
                    level.info = AlmInfo::read_from(&mut ms)?;
                    info_loaded = true;
                }
                SECTION_TILES => {
                    let len = nodes
                        .checked_mul(2)
                        .ok_or_else(|| Error::format("ALM dimensions overflow"))?;
                    let raw = read_layer(&mut ms, len, size, "tiles")?;
                    level.tiles = raw
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes([c[0], c[1]]))
                        .collect();
                }
                SECTION_HEIGHTS => {
                    let raw = read_layer(&mut ms, nodes, size, "heights")?;
                    level.heights = raw.into_iter().map(|h| h as i8).collect();
                }
                SECTION_OBSTACLES => {
                    level.obstacles = read_layer(&mut ms, nodes, size, "obstacles")?;
                }
                _ => debug!("skipping ALM section {} ({} bytes)", id, size),
            }

            // sections are addressed by their declared size
            let end = start + size;
            if ms.set_position(end.max(ms.position())) < end {
                return Err(Error::format(format!("ALM section {} is truncated", id)));
            }
        }

        let nodes = node_count(level.info.width, level.info.height)?;
        if level.tiles.len() != nodes || level.heights.len() != nodes {
            return Err(Error::format("ALM is missing the tile or height layer"));
        }
        if level.obstacles.len() != nodes {
            level.obstacles = vec![0; nodes];
        }

        Ok(level)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut sections: Vec<(u32, Vec<u8>)> = Vec::new();

        let mut info = Vec::new();
        self.info.write_to(&mut info)?;
        sections.push((SECTION_INFO, info));
        sections.push((
            SECTION_TILES,
            self.tiles.iter().flat_map(|t| t.to_le_bytes()).collect(),
        ));
        sections.push((SECTION_HEIGHTS, self.heights.iter().map(|&h| h as u8).collect()));
        sections.push((SECTION_OBSTACLES, self.obstacles.clone()));

        let mut w = Vec::new();
        w.write_le_u32(ALM_SIGNATURE)?;
        w.write_le_u32(HEADER_SIZE)?;
        w.write_le_u32(0)?;
        w.write_le_u32(sections.len() as u32)?;
        w.write_le_u32(0)?;
        for (id, payload) in &sections {
            let size = u32::try_from(payload.len())
                .map_err(|_| Error::format(format!("ALM section {} is too large", id)))?;
            w.write_le_u64(0)?;
            w.write_le_u32(size)?;
            w.write_le_u32(*id)?;
            w.write_le_u32(0)?;
            w.extend_from_slice(payload);
        }
        Ok(w)
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }
}

/// Node count of a `width`×`height` map.
fn node_count(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| Error::format("ALM dimensions overflow"))
}

fn read_layer(ms: &mut MemoryStream, len: usize, size: u64, what: &str) -> Result<Vec<u8>> {
    if len as u64 > size {
        return Err(Error::format(format!(
            "ALM {} layer needs {} bytes, section has {}",
            what, len, size
        )));
    }
    let data = ms.read_vec(len);
    if data.len() != len {
        return Err(Error::format(format!(
            "ALM {} layer has {} of {} bytes",
            what,
            data.len(),
            len
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample() -> AlmLevel {
        let mut level = AlmLevel::new(3, 2).unwrap();
        level.info.name = "Test Map".into();
        level.info.author = "nobody".into();
        level.info.solar_angle = 45.5;
        level.info.count_units = 7;
        level.tiles = vec![0x1101, 0x1102, 0x2003, 4, 5, 6];
        level.heights = vec![0, -3, 12, 127, -128, 1];
        level.obstacles[4] = 9;
        level
    }

    #[test]
    fn parses_written_level() {
        let level = sample();
        let parsed = AlmLevel::parse(level.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, level);
        assert_eq!(parsed.info.name, "Test Map");
        assert_eq!(parsed.heights[4], -128);
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let mut bytes = sample().to_bytes().unwrap();
        // bump the section count and append an unknown section
        bytes[12..16].copy_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&42u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&[1, 2, 3]);
        assert_eq!(AlmLevel::parse(bytes).unwrap(), sample());
    }

    #[test]
    fn header_checks() {
        let good = sample().to_bytes().unwrap();

        let mut bad = good.clone();
        bad[0] = 0;
        assert!(matches!(AlmLevel::parse(bad), Err(Error::InvalidSignature { .. })));

        let mut bad = good.clone();
        bad[4] = 0x18;
        assert!(AlmLevel::parse(bad).is_err());

        let mut bad = good.clone();
        bad[12] = 2;
        assert!(AlmLevel::parse(bad).is_err());

        let mut bad = good;
        bad.truncate(bad.len() - 2);
        assert!(AlmLevel::parse(bad).is_err());
    }

    /// Offset of the info block's width field in a written level.
    const WIDTH_AT: usize = 40;

    fn with_size(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[WIDTH_AT..WIDTH_AT + 4].copy_from_slice(&width.to_le_bytes());
        bytes[WIDTH_AT + 4..WIDTH_AT + 8].copy_from_slice(&height.to_le_bytes());
        bytes
    }

    #[test]
    fn hostile_dimensions_are_errors() {
        assert_eq!(AlmLevel::parse(with_size(3, 2)).unwrap(), sample());

        for (width, height) in [
            (0x1_0000, 0x1_0000),
            (u32::MAX, 2),
            (0xFFFF, 0xFFFF),
            (0x8000_0000, 1),
            (4, 2),
        ] {
            assert!(AlmLevel::parse(with_size(width, height)).is_err(), "{}x{}", width, height);
        }
        assert!(AlmLevel::new(0x1_0000, 0x1_0000).is_err());
    }

    #[test]
    fn hostile_section_headers_are_errors() {
        let good = sample().to_bytes().unwrap();

        // section count far beyond the sections present
        let mut bad = good.clone();
        bad[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(AlmLevel::parse(bad).is_err());

        // info section claiming 4 GiB
        let mut bad = good;
        bad[28..32].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(AlmLevel::parse(bad).is_err());
    }

    proptest! {
        #[test]
        fn patched_headers_never_panic(
            width in any::<u32>(),
            height in any::<u32>(),
            at in 0usize..64,
            value in any::<u32>(),
            keep in 0usize..2048,
        ) {
            let mut bytes = with_size(width, height);
            bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
            bytes.truncate(keep);
            let _ = AlmLevel::parse(bytes);
        }
    }

    #[test]
    fn layers_before_info_are_rejected() {
        let level = sample();
        let mut w = Vec::new();
        w.write_le_u32(ALM_SIGNATURE).unwrap();
        w.write_le_u32(HEADER_SIZE).unwrap();
        w.write_le_u32(0).unwrap();
        w.write_le_u32(3).unwrap();
        w.write_le_u32(0).unwrap();
        w.write_le_u64(0).unwrap();
        w.write_le_u32(12).unwrap();
        w.write_le_u32(SECTION_TILES).unwrap();
        w.write_le_u32(0).unwrap();
        w.extend(level.tiles.iter().flat_map(|t| t.to_le_bytes()));
        assert!(AlmLevel::parse(w).is_err());
    }
}

//! Runtime configuration.
//!
//! Loaded from `allods.toml`; every field has a default so partial files work.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "allods.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resources: ResourceConfig,
    pub render: RenderConfig,
    pub lighting: LightingConfig,
    pub world: WorldConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Directory searched before any archive; archives are opened from here too.
    pub data_dir: PathBuf,
    /// Archives in lookup order.
    pub archives: Vec<String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            archives: ["main.res", "graphics.res", "world.res", "patch.res", "scenario.res"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Overlay terrain cell borders
    pub show_grid: bool,
    /// Composite fog of war
    pub fog: bool,
    /// Horizontal shadow skew at the top of a sprite, in pixels
    pub shadow_offset: i32,
    /// Channel divisor for shadows
    pub shadow_power: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            show_grid: false,
            fog: true,
            shadow_offset: 32,
            shadow_power: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub tint: [u8; 3],
    pub brightness: u8,
    pub contrast: u8,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            tint: [255, 255, 255],
            brightness: 255,
            contrast: 255,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Game speed, 0..=8
    pub speed: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self { speed: 5 }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults when the file does not exist.
    /// A file that exists but does not parse is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        info!("saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.resources.archives.len(), 5);
        assert_eq!(config.world.speed, 5);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[render]\nshow_grid = true\n[lighting]\nbrightness = 128\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.render.show_grid);
        assert!(config.render.fog);
        assert_eq!(config.lighting.brightness, 128);
        assert_eq!(config.lighting.contrast, 255);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = Config::default();
        config.world.speed = 2;
        config.resources.archives = vec!["graphics.res".into()];
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[render\nfog = ").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }
}

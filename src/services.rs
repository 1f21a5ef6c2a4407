//! Shared handles the rest of the program is given explicitly.

use std::{path::Path, sync::Arc};

use crate::{
    config::Config,
    error::Result,
    level::AlmLevel,
    loader::LoadTask,
    obstacle::ObstacleClasses,
    render::{MapRenderer, TileSet},
    resources::ResourceManager,
    world::World,
};

pub struct Services {
    pub config: Config,
    pub resources: Arc<ResourceManager>,
}

/// Everything a map needs on screen, built off the main thread.
pub struct LoadedMap {
    pub world: World,
    pub classes: ObstacleClasses,
    pub tiles: TileSet,
}

impl Services {
    /// Opens the configured archives.
    pub fn new(config: Config) -> Result<Self> {
        let resources = Arc::new(ResourceManager::new(&config.resources)?);
        Ok(Self { config, resources })
    }

    pub fn with_resources(config: Config, resources: ResourceManager) -> Self {
        Self {
            config,
            resources: Arc::new(resources),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Config::load(path)?)
    }

    /// Starts loading a level, its obstacle classes and tile images in the
    /// background.
    pub fn load_map(&self, level_path: &str) -> Result<LoadTask<LoadedMap>> {
        let resources = Arc::clone(&self.resources);
        let level_path = level_path.to_string();
        let speed = self.config.world.speed;
        LoadTask::spawn("map loader", move || {
            let level = AlmLevel::load(&resources, &level_path)?;
            let mut classes = ObstacleClasses::load(&resources)?;
            classes.load_sprites(&resources)?;
            let mut world = World::from_level(&level, &classes);
            world.set_speed(speed);
            let tiles = TileSet::load(&resources, &world)?;
            Ok(LoadedMap {
                world,
                classes,
                tiles,
            })
        })
    }

    pub fn renderer(&self) -> MapRenderer {
        MapRenderer::new(&self.config.render, self.config.lighting)
    }
}

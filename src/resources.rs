use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    archive::Archive,
    config::ResourceConfig,
    error::{Error, Result},
};

/// Asset lookup: the data directory on disk first, then each archive in order.
pub struct ResourceManager {
    data_dir: PathBuf,
    archives: Vec<Archive>,
}

impl ResourceManager {
    /// Opens every configured archive. A missing or broken archive is an error.
    pub fn new(config: &ResourceConfig) -> Result<Self> {
        let mut archives = Vec::with_capacity(config.archives.len());
        for name in &config.archives {
            let path = config.data_dir.join(name);
            let archive = Archive::open(&path).map_err(|e| {
                warn!("couldn't load \"{}\": {}", path.display(), e);
                e
            })?;
            archives.push(archive);
        }
        Ok(Self::with_archives(&config.data_dir, archives))
    }

    pub fn with_archives(data_dir: impl AsRef<Path>, archives: Vec<Archive>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            archives,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    fn disk_path(&self, path: &str) -> PathBuf {
        self.data_dir.join(path.replace('\\', "/"))
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let disk = self.disk_path(path);
        if disk.is_file() {
            debug!("reading \"{}\" from disk", disk.display());
            return Ok(std::fs::read(disk)?);
        }

        for archive in &self.archives {
            if archive.exists(path) {
                return archive.read_file(path);
            }
        }

        warn!("couldn't find \"{}\"", path);
        Err(Error::NotFound(path.to_string()))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.disk_path(path).is_file() || self.archives.iter().any(|a| a.exists(path))
    }
}

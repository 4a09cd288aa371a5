//! Configuration service.
//!
//! Loads [`ParleyConfig`] from `~/.config/parley/config.toml` (or an explicit
//! path) and caches it until invalidated.

use crate::paths::ParleyPaths;
use crate::storage::AtomicTomlFile;
use parley_core::config::ParleyConfig;
use parley_core::{ParleyError, Result};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct ConfigService {
    /// Explicit config file; `None` means the platform default.
    path: Option<PathBuf>,
    /// Lazily loaded configuration.
    config: Arc<RwLock<Option<ParleyConfig>>>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self {
            path: None,
            config: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// The file this service reads.
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => ParleyPaths::config_file(),
        }
    }

    /// Returns the configuration, loading it on first access.
    ///
    /// A missing file yields the defaults; an unreadable or invalid file is a
    /// `Config` error and is not cached.
    pub fn get_config(&self) -> Result<ParleyConfig> {
        {
            let cached = self.config.read().map_err(|_| poisoned())?;
            if let Some(config) = cached.as_ref() {
                return Ok(config.clone());
            }
        }

        let loaded = self.load()?;

        let mut cache = self.config.write().map_err(|_| poisoned())?;
        *cache = Some(loaded.clone());
        Ok(loaded)
    }

    /// Forces a reload on next access.
    pub fn invalidate_cache(&self) -> Result<()> {
        let mut cache = self.config.write().map_err(|_| poisoned())?;
        *cache = None;
        Ok(())
    }

    fn load(&self) -> Result<ParleyConfig> {
        let path = self.config_path()?;
        let file = AtomicTomlFile::<ParleyConfig>::new(path.clone());
        let config = file
            .load()
            .map_err(|e| ParleyError::config(format!("{}: {e}", path.display())))?
            .unwrap_or_default();

        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ParleyError {
    ParleyError::internal("config cache lock poisoned")
}

//! Path resolution for Parley configuration and data files.
//!
//! ```text
//! ~/.config/parley/          # config directory
//! └── config.toml            # ParleyConfig
//!
//! ~/.local/share/parley/     # data directory
//! └── store.toml             # default store snapshot
//! ```

use parley_core::ParleyError;
use std::path::PathBuf;

const APP_DIR: &str = "parley";

pub struct ParleyPaths;

impl ParleyPaths {
    /// Platform config directory with `parley` appended.
    pub fn config_dir() -> Result<PathBuf, ParleyError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| ParleyError::config("cannot determine the config directory"))
    }

    /// Platform data directory with `parley` appended.
    pub fn data_dir() -> Result<PathBuf, ParleyError> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| ParleyError::config("cannot determine the data directory"))
    }

    pub fn config_file() -> Result<PathBuf, ParleyError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn default_snapshot_file() -> Result<PathBuf, ParleyError> {
        Ok(Self::data_dir()?.join("store.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_is_under_config_dir() {
        let Ok(config_dir) = ParleyPaths::config_dir() else {
            return;
        };
        assert!(config_dir.ends_with("parley"));
        let config_file = ParleyPaths::config_file().unwrap();
        assert!(config_file.ends_with("config.toml"));
        assert!(config_file.starts_with(&config_dir));
    }

    #[test]
    fn test_snapshot_file_is_under_data_dir() {
        let Ok(data_dir) = ParleyPaths::data_dir() else {
            return;
        };
        assert!(ParleyPaths::default_snapshot_file()
            .unwrap()
            .starts_with(&data_dir));
    }
}

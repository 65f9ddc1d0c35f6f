use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::disk_cache::RetryPolicy;

/// Configuration for the cover art subsystem. Passed explicitly to the constructors
/// that need it; nothing here is read from global state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding one file per cached cover.
    pub cache_dir: PathBuf,
    /// Image shown whenever a track has no usable art.
    pub default_art: PathBuf,
    /// Maximum width of decoded thumbnails, in pixels.
    pub thumbnail_max_width: u32,
    /// How many viewport heights to prefetch above and below the visible range.
    pub preload_factor: f64,
    /// Quiet period before a burst of scroll events is acted upon.
    pub debounce_ms: u64,
    /// Upper bound on loads running at once.
    pub max_concurrent_loads: usize,
    /// Attempts made when a cache write hits a locked file.
    pub write_retry_attempts: u32,
    /// Delay between cache write attempts.
    pub write_retry_delay_ms: u64,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(Self::DEFAULT_CACHE_DIR_NAME),
            default_art: PathBuf::from("assets/no-album-art.png"),
            thumbnail_max_width: 160,
            preload_factor: 1.5,
            debounce_ms: 50,
            max_concurrent_loads: 5,
            write_retry_attempts: 3,
            write_retry_delay_ms: 100,
        }
    }
}
impl Config {
    pub const FILENAME: &str = "starling.toml";
    pub const DEFAULT_CACHE_DIR_NAME: &str = "album-art-cache";

    /// Load a TOML config file, returning the defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file at {}, using defaults", path.display());
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::Read(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, toml::to_string(self)?).map_err(ConfigError::Read)?;
        tracing::info!("saved config to {}", path.display());
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.write_retry_attempts.max(1),
            delay: Duration::from_millis(self.write_retry_delay_ms),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug)]
/// An error that can occur when loading or saving the config.
pub enum ConfigError {
    /// The file exists but could not be read or written.
    Read(std::io::Error),
    /// The file is not valid TOML for [`Config`].
    Parse(toml::de::Error),
    /// The config could not be serialized.
    Serialize(toml::ser::Error),
}
impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(e) => write!(f, "I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "Parse error: {e}"),
            ConfigError::Serialize(e) => write!(f, "Serialization error: {e}"),
        }
    }
}
impl std::error::Error for ConfigError {}
impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}
impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

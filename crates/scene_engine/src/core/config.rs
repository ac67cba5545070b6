//! Engine configuration
//!
//! Configuration types are plain serde structs with sensible defaults;
//! [`Config`] adds TOML/RON file round-tripping so settings files stay
//! format-agnostic.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents failed to parse
    #[error("parse error: {0}")]
    Parse(String),

    /// Settings failed to serialize
    #[error("serialization error: {0}")]
    Serialize(String),

    /// Extension is neither `.toml` nor `.ron`
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// File round-tripping for configuration types
pub trait Config: Serialize + DeserializeOwned + Default {
    /// Load from a `.toml` or `.ron` file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save to a `.toml` or `.ron` file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Streaming loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Backpressure threshold: a session reports not-ready once this many
    /// bytes are queued unprocessed
    pub high_water_mark: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            high_water_mark: 64 * 1024,
        }
    }
}

/// Top-level engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Streaming loader settings
    pub loader: LoaderConfig,
}

impl Config for EngineConfig {}

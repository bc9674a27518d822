use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Runtime configuration for the reference server.
///
/// Loaded from an optional TOML file (`Config::load_from`) or, absent that,
/// `Config::default()` — the same fallback the teacher's `utils::config`
/// module used, generalized to actually read the file it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// TCP listen backlog; spec fixes this at 100.
    pub backlog: i32,
    pub resource_limits: ResourceLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// High-water mark for a connection's write buffer before backpressure
    /// is surfaced as `Error::Backpressure` (spec §9 Open Question 2).
    pub max_write_buffer_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_write_buffer_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1337,
            backlog: 100,
            resource_limits: ResourceLimits::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` if it exists, falling back to
    /// defaults when it does not.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn load() -> Result<Self> {
        Self::load_from("vimchannel.toml")
    }
}

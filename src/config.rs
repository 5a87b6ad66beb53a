//! Configuration loading
//!
//! Settings come from an optional TOML file. Every field has a default, so an
//! empty file (or none at all) is a valid configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::analytics::DEFAULT_ENDPOINT;
use crate::cache::{CacheError, CacheManager};
use crate::database::DatabaseSettings;
use crate::request::{
    HttpTransport, TransportError, DEFAULT_CACHE_TTL, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
};

/// Name of the config file inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist
    #[error("Specified config file not found: {0}")]
    NotFound(PathBuf),

    /// The config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Response cache settings
    pub cache: CacheConfig,
    /// HTTP client settings
    pub client: ClientConfig,
    /// Google Analytics settings, if used
    pub analytics: Option<AnalyticsConfig>,
    /// Database settings, if used
    pub database: Option<DatabaseSettings>,
    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (defaults to the platform cache directory)
    pub directory: Option<PathBuf>,
    /// How long entries stay fresh, e.g. "1h" or "30m"
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Optional file extension for cache files
    pub extension: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            ttl: DEFAULT_CACHE_TTL,
            extension: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// User-agent header value
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Tracking id, e.g. "UA-XXXX-Y"
    pub tracking_id: String,
    /// Collect endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when neither RUST_LOG nor -v is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Parses configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads configuration
    ///
    /// An explicit path must exist. Without one, the file in the platform config
    /// directory is used when present, and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        debug!("Loading config from: {}", path.display());
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Location of the config file in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "cached-request")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Builds the cache manager described by this configuration
    pub fn cache_manager(&self) -> Result<CacheManager, CacheError> {
        let cache = match &self.cache.directory {
            Some(directory) => CacheManager::with_dir(directory.clone()),
            None => CacheManager::new()?,
        };
        Ok(match &self.cache.extension {
            Some(extension) => cache.with_extension(extension.clone()),
            None => cache,
        })
    }

    /// Builds an HTTP transport with the configured timeout and user-agent
    pub fn transport(&self) -> Result<HttpTransport, TransportError> {
        HttpTransport::with_settings(self.client.timeout, &self.client.user_agent)
    }
}

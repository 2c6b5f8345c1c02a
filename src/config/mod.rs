//! Configuration management for Tankobon.
//!
//! Configuration is read from `~/.config/tankobon/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
    pub sync: Option<SyncConfig>,
    pub engine: EngineConfig,
}

/// A source server hosting one or more drivers.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub address: String,
    #[serde(default)]
    pub access_key: Option<String>,
}

/// Timers and limits of the background engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ask source servers to route driver traffic through their proxy
    pub use_proxy: bool,
    pub health_interval_secs: u64,
    pub cache_ttl_secs: u64,
    pub sync_debounce_secs: u64,
    pub sync_interval_secs: u64,
    pub freshness_interval_secs: u64,
    pub initialize_attempts: u32,
    /// Detail fetches of this many ids or more go out as a POST body
    pub batch_threshold: usize,
    pub http_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_proxy: false,
            health_interval_secs: 5,
            cache_ttl_secs: 2 * 60 * 60,
            sync_debounce_secs: 5,
            sync_interval_secs: 30,
            freshness_interval_secs: 60 * 60,
            initialize_attempts: 5,
            batch_threshold: 10,
            http_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.max(1))
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_secs(self.sync_debounce_secs.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn freshness_interval(&self) -> Duration {
        Duration::from_secs(self.freshness_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/tankobon/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("tankobon").join("config.toml"))
    }

    /// The server marked `is_default`, else the first one.
    pub fn default_server(&self) -> Option<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| s.is_default)
            .or_else(|| self.servers.first())
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# Tankobon Configuration
#
# Source servers host one or more drivers. Add one [[servers]] block per
# server; access_key is sent as the X-Access-Key header when present.
#
# [[servers]]
# address = "https://manga.example.com"
# access_key = "secret"
# is_default = true
#
# The sync server keeps settings, history and collections in step across
# devices. Log in with `tankobon login <email>` once it is configured.
#
# [sync]
# address = "https://sync.example.com"

[engine]
# Ask source servers to route driver traffic through their proxy
use_proxy = false

# Seconds between health checks of down servers and sources
health_interval_secs = 5

# Seconds before list, search and item caches are dropped
cache_ttl_secs = 7200

# Seconds to wait after reading before syncing history
sync_debounce_secs = 5

# Seconds between routine syncs
sync_interval_secs = 30

# Seconds between refreshes of saved items
freshness_interval_secs = 3600

# Attempts at fetching a source's capabilities before giving up
initialize_attempts = 5

# Detail fetches of this many ids or more are sent as a POST body
batch_threshold = 10

# HTTP request timeout in seconds
http_timeout_secs = 10
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert!(config.servers.is_empty());
        assert!(config.sync.is_none());
        assert_eq!(config.engine.batch_threshold, 10);
        assert_eq!(config.engine.health_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_servers_and_sync() {
        let content = r##"
[[servers]]
address = "https://a.example.com"

[[servers]]
address = "https://b.example.com"
access_key = "k"
is_default = true

[sync]
address = "https://sync.example.com"

[engine]
use_proxy = true
"##;
        let config: Config = toml::from_str(content).expect("Config should parse");

        assert_eq!(config.servers.len(), 2);
        let default = config.default_server().unwrap();
        assert_eq!(default.address, "https://b.example.com");
        assert_eq!(default.access_key.as_deref(), Some("k"));
        assert_eq!(
            config.sync.as_ref().map(|s| s.address.as_str()),
            Some("https://sync.example.com")
        );
        assert!(config.engine.use_proxy);
        // Default value
        assert_eq!(config.engine.sync_interval_secs, 30);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");

        assert!(config.default_server().is_none());
        assert_eq!(config.engine.cache_ttl(), Duration::from_secs(7200));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.engine.initialize_attempts, 5);

        // Second load parses the file just written
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.engine.freshness_interval_secs, 3600);
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[engine]\nbatch_threshold = \"ten\"\n").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}

//! Relay configuration.
//!
//! Defaults, then an optional TOML file, then CLI flags (applied by the
//! binary). Every file key is optional:
//!
//! ```toml
//! listen = "0.0.0.0:1999"
//! debounce_ms = 2000
//! database = "/var/lib/weft/weft.db"
//! outbound_capacity = 1024
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    DB_FILE_NAME, DEFAULT_BIND_ADDRESS, DEFAULT_DEBOUNCE, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_PORT,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid listen address {0:?}")]
    Listen(String),
}

/// Settings for one relay process.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    /// Quiet period before a room persists.
    pub debounce: Duration,
    pub database: PathBuf,
    /// Frames queued per connection before it is dropped as a slow consumer.
    pub outbound_capacity: usize,
}

/// On-disk layer. Missing keys keep the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    listen: Option<String>,
    debounce_ms: Option<u64>,
    database: Option<PathBuf>,
    outbound_capacity: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(
                DEFAULT_BIND_ADDRESS
                    .parse()
                    .unwrap_or(std::net::Ipv4Addr::LOCALHOST.into()),
                DEFAULT_PORT,
            ),
            debounce: DEFAULT_DEBOUNCE,
            database: PathBuf::from(DB_FILE_NAME),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// Defaults overlaid with `path`, if given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            config.apply_toml(&contents).map_err(|e| match e {
                LayerError::Parse(source) => ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                },
                LayerError::Listen(addr) => ConfigError::Listen(addr),
            })?;
            tracing::debug!(path = %path.display(), "loaded relay config");
        }
        Ok(config)
    }

    fn apply_toml(&mut self, contents: &str) -> Result<(), LayerError> {
        let layer: FileConfig = toml::from_str(contents).map_err(LayerError::Parse)?;
        if let Some(listen) = layer.listen {
            self.set_listen(&listen).map_err(|_| LayerError::Listen(listen))?;
        }
        if let Some(ms) = layer.debounce_ms {
            self.debounce = Duration::from_millis(ms);
        }
        if let Some(database) = layer.database {
            self.database = database;
        }
        if let Some(capacity) = layer.outbound_capacity {
            self.outbound_capacity = capacity;
        }
        Ok(())
    }

    pub fn set_listen(&mut self, addr: &str) -> Result<(), ConfigError> {
        self.listen = addr
            .parse()
            .map_err(|_| ConfigError::Listen(addr.to_string()))?;
        Ok(())
    }
}

#[derive(Debug)]
enum LayerError {
    Parse(toml::de::Error),
    Listen(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.listen.to_string(), "127.0.0.1:1999");
        assert_eq!(config.debounce, Duration::from_secs(2));
        assert_eq!(config.outbound_capacity, 1024);
    }

    #[test]
    fn test_file_overrides_some_keys() {
        let mut config = RelayConfig::default();
        config
            .apply_toml("listen = \"0.0.0.0:4000\"\ndebounce_ms = 500\n")
            .unwrap();
        assert_eq!(config.listen.port(), 4000);
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert_eq!(config.outbound_capacity, 1024);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let mut config = RelayConfig::default();
        assert!(config.apply_toml("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(&path, "database = \"/tmp/x.db\"\noutbound_capacity = 8\n").unwrap();
        let config = RelayConfig::load(Some(&path)).unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.outbound_capacity, 8);
    }

    #[test]
    fn test_bad_listen_address() {
        let mut config = RelayConfig::default();
        assert!(matches!(
            config.set_listen("not an address"),
            Err(ConfigError::Listen(_))
        ));
    }
}

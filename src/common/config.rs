//! Configuration file handling

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Lookup request settings
    #[serde(default)]
    pub requests: RequestConfig,

    /// Lookup result cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Offline delivery queue settings
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    /// Auto-exit after this many minutes with no connected client
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_minutes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    30
}

/// Completion/hover/definition/reference request settings
#[derive(Debug, Deserialize, Clone)]
pub struct RequestConfig {
    /// Seconds before an unanswered request is failed and forgotten
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_request_timeout(),
        }
    }
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_request_timeout() -> u64 {
    30
}

/// Lookup result cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Maximum cached results per session; 0 disables caching
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

fn default_cache_entries() -> usize {
    1024
}

/// Which store backs the offline delivery queue
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Process-local store, lost on restart
    #[default]
    Memory,
    /// Redis lists, shared between host processes
    Redis,
}

/// Offline delivery queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,

    /// Connection URL for the redis backend
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Hours a user's queue survives after its last append
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Namespace for per-user keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            redis_url: None,
            retention_hours: default_retention_hours(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl QueueConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 60 * 60)
    }
}

fn default_retention_hours() -> u64 {
    24
}

fn default_key_prefix() -> String {
    "collab-debug:offline".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.daemon.idle_timeout_minutes, 30);
        assert_eq!(config.requests.timeout_secs, 30);
        assert_eq!(config.cache.max_entries, 1024);
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.queue.retention(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[requests]
timeout_secs = 5

[queue]
backend = "redis"
redis_url = "redis://127.0.0.1/"
key_prefix = "test:offline"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.requests.timeout(), Duration::from_secs(5));
        assert_eq!(config.queue.backend, QueueBackend::Redis);
        assert_eq!(config.queue.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(config.queue.key_prefix, "test:offline");
        assert_eq!(config.queue.retention_hours, 24);
    }

    #[test]
    fn test_invalid_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[queue]\nbackend = \"carrier-pigeon\"").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, crate::common::Error::ConfigParse(_)));
    }
}

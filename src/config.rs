//! Configuration for shopflow.
//!
//! Settings are read from `.shopflow/shopflow.toml` (or `--config <path>`),
//! then overridden by environment variables, then by CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev_mode = false
//!
//! [store]
//! path = ".shopflow/board.db"
//! lock_timeout_ms = 5000
//!
//! [cache]
//! board_ttl_secs = 60
//! counter_ttl_secs = 300
//! max_entries = 1024
//!
//! [fanout]
//! subscriber_buffer = 64
//! event_buffer = 256
//! ping_interval_secs = 25
//! pong_timeout_secs = 35
//!
//! [logging]
//! level = "info"
//! json = false
//! # directory = ".shopflow/logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = ".shopflow/shopflow.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for local front-end development
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSection {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Upper bound on waiting for the store's write lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".shopflow/board.db")
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_board_ttl_secs")]
    pub board_ttl_secs: u64,
    #[serde(default = "default_counter_ttl_secs")]
    pub counter_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_board_ttl_secs() -> u64 {
    60
}

fn default_counter_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> usize {
    1024
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            board_ttl_secs: default_board_ttl_secs(),
            counter_ttl_secs: default_counter_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutSection {
    /// Frames queued per connection before it is dropped as too slow
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Mutation events buffered before the pump falls back to a resync
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_event_buffer() -> usize {
    256
}

fn default_ping_interval_secs() -> u64 {
    25
}

fn default_pong_timeout_secs() -> u64 {
    35
}

impl Default for FanoutSection {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            event_buffer: default_event_buffer(),
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Daily-rolling log files are written here when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

/// Root of `shopflow.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub fanout: FanoutSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ShopConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse shopflow.toml")
    }

    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// File (or defaults) followed by environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let mut config = Self::load_or_default(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `SHOPFLOW_PORT`, `SHOPFLOW_DB_PATH` and `SHOPFLOW_LOG`.
    ///
    /// `lookup` abstracts the environment so tests don't mutate the
    /// process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("SHOPFLOW_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid SHOPFLOW_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("SHOPFLOW_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("SHOPFLOW_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize shopflow.toml")?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.cache.board_ttl_secs == 0 {
            warnings.push(
                "cache.board_ttl_secs is 0: every board read will rebuild from the store"
                    .to_string(),
            );
        }
        if self.cache.counter_ttl_secs == 0 {
            warnings.push(
                "cache.counter_ttl_secs is 0: every count read will query the store".to_string(),
            );
        }
        if self.cache.max_entries == 0 {
            warnings.push("cache.max_entries is 0: it will be treated as 1".to_string());
        }
        if self.fanout.pong_timeout_secs <= self.fanout.ping_interval_secs {
            warnings.push(format!(
                "fanout.pong_timeout_secs ({}) should be greater than ping_interval_secs ({})",
                self.fanout.pong_timeout_secs, self.fanout.ping_interval_secs
            ));
        }
        if self.fanout.ping_interval_secs == 0 {
            warnings.push("fanout.ping_interval_secs must be at least 1".to_string());
        }
        if self.fanout.subscriber_buffer == 0 || self.fanout.event_buffer == 0 {
            warnings.push("fanout buffers must be non-zero; 1 will be used".to_string());
        }
        if self.store.lock_timeout_ms == 0 {
            warnings.push(
                "store.lock_timeout_ms is 0: concurrent writers will fail immediately".to_string(),
            );
        }

        warnings
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.store.lock_timeout_ms)
    }

    pub fn board_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.board_ttl_secs)
    }

    pub fn counter_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.counter_ttl_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.fanout.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.fanout.pong_timeout_secs)
    }
}

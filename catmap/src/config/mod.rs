//! Application configuration.
//!
//! [`AppConfig`] is the single configuration surface handed to
//! [`Session::start`](crate::session::Session::start). It can be built in
//! code with the `with_*` builders or read from an INI file through
//! [`ConfigFile`].

mod file;

pub use file::{ConfigError, ConfigFile};

use std::path::PathBuf;
use std::time::Duration;

/// Default memory budget for decoded tiles: 64 MiB.
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 64 * 1024 * 1024;

/// The cache never holds fewer tiles than this, whatever the budget.
pub const DEFAULT_MIN_TILE_SLOTS: usize = 50;

/// Default bound of the shared track cache, counted in points.
pub const DEFAULT_TRACK_CACHE_POINTS: u64 = 500_000;

/// Default HTTP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default HTTP read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// User-Agent sent with tile requests.
pub const DEFAULT_USER_AGENT: &str = concat!("catmap/", env!("CARGO_PKG_VERSION"));

/// Directory name used under the platform data directory.
const DATA_DIR_NAME: &str = "catmap";

/// Top-level configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Root of the durable layout (maps, tracks, logs).
    pub data_dir: PathBuf,

    /// Tile cache configuration.
    pub tile_cache: TileCacheConfig,

    /// Bound of the shared track cache, counted in points.
    pub track_cache_points: u64,

    /// Network configuration for tile downloads.
    pub network: NetworkConfig,

    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
}

/// Tile cache sizing.
#[derive(Clone, Debug, PartialEq)]
pub struct TileCacheConfig {
    /// Memory available for decoded tiles, in bytes.
    pub memory_budget_bytes: u64,

    /// Lower bound on the number of slots.
    pub min_slots: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            min_slots: DEFAULT_MIN_TILE_SLOTS,
        }
    }
}

impl TileCacheConfig {
    /// Number of slots for tiles of `tile_size` pixels, 4 bytes per pixel.
    pub fn slots_for(&self, tile_size: u32) -> usize {
        let tile_bytes = (tile_size as u64 * tile_size as u64 * 4).max(1);
        let slots = usize::try_from(self.memory_budget_bytes / tile_bytes).unwrap_or(usize::MAX);
        slots.max(self.min_slots).max(1)
    }
}

/// HTTP settings.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new(default_data_dir())
    }
}

impl AppConfig {
    /// Create a config rooted at `data_dir` with defaults everywhere else.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            tile_cache: TileCacheConfig::default(),
            track_cache_points: DEFAULT_TRACK_CACHE_POINTS,
            network: NetworkConfig::default(),
            log_level: "info".to_string(),
        }
    }

    /// Build a config from a parsed configuration file.
    ///
    /// Keys missing from the file keep their defaults.
    pub fn from_config_file(file: &ConfigFile) -> Self {
        let mut config = Self::new(file.data_dir.clone().unwrap_or_else(default_data_dir));
        if let Some(mb) = file.memory_budget_mb {
            config.tile_cache.memory_budget_bytes = mb.saturating_mul(1024 * 1024);
        }
        if let Some(min_slots) = file.min_slots {
            config.tile_cache.min_slots = min_slots;
        }
        if let Some(points) = file.track_cache_points {
            config.track_cache_points = points;
        }
        if let Some(secs) = file.connect_timeout_secs {
            config.network.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.read_timeout_secs {
            config.network.read_timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = &file.user_agent {
            config.network.user_agent = agent.clone();
        }
        if let Some(level) = &file.log_level {
            config.log_level = level.clone();
        }
        config
    }

    /// Set the tile memory budget.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.tile_cache.memory_budget_bytes = bytes;
        self
    }

    /// Set the minimum number of tile slots.
    pub fn with_min_tile_slots(mut self, slots: usize) -> Self {
        self.tile_cache.min_slots = slots;
        self
    }

    /// Set the track cache bound, in points.
    pub fn with_track_cache_points(mut self, points: u64) -> Self {
        self.track_cache_points = points;
        self
    }

    /// Set both HTTP timeouts.
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.network.connect_timeout = connect;
        self.network.read_timeout = read;
        self
    }

    /// Directory the rolling log files go to.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("log")
    }
}

/// Platform data directory, falling back to the working directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
        .join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_cache_default_slots() {
        let config = TileCacheConfig::default();
        // 64 MiB / 256 KiB per tile
        assert_eq!(config.slots_for(256), 256);
    }

    #[test]
    fn test_tile_cache_minimum_slots() {
        let config = TileCacheConfig {
            memory_budget_bytes: 1024,
            min_slots: 50,
        };
        assert_eq!(config.slots_for(256), 50);
    }

    #[test]
    fn test_app_config_builders() {
        let config = AppConfig::new(PathBuf::from("/data"))
            .with_memory_budget(2 * 1024 * 1024)
            .with_min_tile_slots(3)
            .with_track_cache_points(10)
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(2));

        assert_eq!(config.tile_cache.memory_budget_bytes, 2 * 1024 * 1024);
        assert_eq!(config.tile_cache.min_slots, 3);
        assert_eq!(config.track_cache_points, 10);
        assert_eq!(config.network.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.network.read_timeout, Duration::from_secs(2));
        assert_eq!(config.log_dir(), PathBuf::from("/data/log"));
    }

    #[test]
    fn test_from_config_file_keeps_defaults_for_missing_keys() {
        let file = ConfigFile {
            memory_budget_mb: Some(8),
            ..ConfigFile::default()
        };
        let config = AppConfig::from_config_file(&file);
        assert_eq!(config.tile_cache.memory_budget_bytes, 8 * 1024 * 1024);
        assert_eq!(config.tile_cache.min_slots, DEFAULT_MIN_TILE_SLOTS);
        assert_eq!(config.network, NetworkConfig::default());
    }

    #[test]
    fn test_from_config_file_saturates_huge_budget() {
        let file = ConfigFile {
            memory_budget_mb: Some(u64::MAX),
            ..ConfigFile::default()
        };
        let config = AppConfig::from_config_file(&file);
        assert_eq!(config.tile_cache.memory_budget_bytes, u64::MAX);
        assert!(config.tile_cache.slots_for(256) >= DEFAULT_MIN_TILE_SLOTS);
    }
}

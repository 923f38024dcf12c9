//! INI configuration file.
//!
//! ```ini
//! [storage]
//! root = /home/user/.local/share/catmap
//!
//! [cache]
//! memory_budget_mb = 64
//! min_slots = 50
//! track_cache_points = 500000
//!
//! [network]
//! connect_timeout_secs = 10
//! read_timeout_secs = 15
//! user_agent = catmap
//!
//! [logging]
//! level = info
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use thiserror::Error;

/// Errors reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("Cannot write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for [{section}] {key}: {value:?}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

/// Values read from the configuration file; `None` means "use the default".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub data_dir: Option<PathBuf>,
    pub memory_budget_mb: Option<u64>,
    pub min_slots: Option<usize>,
    pub track_cache_points: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigFile {
    /// Load the file at `path`. A missing file yields all defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read {
            path: PathBuf::from("<string>"),
            source: ini::Error::Parse(e),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let get = |section: &str, key: &str| -> Option<String> {
            ini.section(Some(section))
                .and_then(|s| s.get(key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            data_dir: get("storage", "root").map(PathBuf::from),
            memory_budget_mb: parse_value(get("cache", "memory_budget_mb"), "cache", "memory_budget_mb")?,
            min_slots: parse_value(get("cache", "min_slots"), "cache", "min_slots")?,
            track_cache_points: parse_value(
                get("cache", "track_cache_points"),
                "cache",
                "track_cache_points",
            )?,
            connect_timeout_secs: parse_value(
                get("network", "connect_timeout_secs"),
                "network",
                "connect_timeout_secs",
            )?,
            read_timeout_secs: parse_value(
                get("network", "read_timeout_secs"),
                "network",
                "read_timeout_secs",
            )?,
            user_agent: get("network", "user_agent"),
            log_level: get("logging", "level"),
        })
    }

    /// Write the set values back to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut ini = Ini::new();
        if let Some(dir) = &self.data_dir {
            ini.with_section(Some("storage"))
                .set("root", dir.to_string_lossy().to_string());
        }
        if let Some(v) = self.memory_budget_mb {
            ini.with_section(Some("cache")).set("memory_budget_mb", v.to_string());
        }
        if let Some(v) = self.min_slots {
            ini.with_section(Some("cache")).set("min_slots", v.to_string());
        }
        if let Some(v) = self.track_cache_points {
            ini.with_section(Some("cache")).set("track_cache_points", v.to_string());
        }
        if let Some(v) = self.connect_timeout_secs {
            ini.with_section(Some("network")).set("connect_timeout_secs", v.to_string());
        }
        if let Some(v) = self.read_timeout_secs {
            ini.with_section(Some("network")).set("read_timeout_secs", v.to_string());
        }
        if let Some(v) = &self.user_agent {
            ini.with_section(Some("network")).set("user_agent", v.clone());
        }
        if let Some(v) = &self.log_level {
            ini.with_section(Some("logging")).set("level", v.clone());
        }

        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        ini.write_to_file(path).map_err(write_err)
    }
}

fn parse_value<T: FromStr>(
    raw: Option<String>,
    section: &'static str,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                section,
                key,
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let file = ConfigFile::parse(
            "[storage]\nroot = /tmp/cat\n\n[cache]\nmemory_budget_mb = 16\nmin_slots = 60\n\n\
             [network]\nconnect_timeout_secs = 3\nuser_agent = test-agent\n\n[logging]\nlevel = debug\n",
        )
        .unwrap();

        assert_eq!(file.data_dir, Some(PathBuf::from("/tmp/cat")));
        assert_eq!(file.memory_budget_mb, Some(16));
        assert_eq!(file.min_slots, Some(60));
        assert_eq!(file.connect_timeout_secs, Some(3));
        assert_eq!(file.read_timeout_secs, None);
        assert_eq!(file.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(file.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_parse_rejects_bad_number() {
        let result = ConfigFile::parse("[cache]\nmin_slots = many\n");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "min_slots",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::load(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(file, ConfigFile::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.ini");
        let file = ConfigFile {
            memory_budget_mb: Some(32),
            log_level: Some("warn".to_string()),
            ..ConfigFile::default()
        };
        file.save(&path).unwrap();

        assert_eq!(ConfigFile::load(&path).unwrap(), file);
    }
}

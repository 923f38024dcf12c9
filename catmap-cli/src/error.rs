//! CLI error type.

use std::fmt;

use catmap::config::ConfigError;
use catmap::map::MapError;
use catmap::storage::StorageError;
use catmap::SessionError;

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    Config(String),
    Storage(StorageError),
    Session(SessionError),
    Map(MapError),
    Io(std::io::Error),
    Input(String),
    Timeout(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Storage(e) => write!(f, "Storage error: {}", e),
            CliError::Session(e) => write!(f, "{}", e),
            CliError::Map(e) => write!(f, "Map error: {}", e),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
            CliError::Input(msg) => write!(f, "Invalid input: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timed out: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Storage(e) => Some(e),
            CliError::Session(e) => Some(e),
            CliError::Map(e) => Some(e),
            CliError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Storage(e)
    }
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        CliError::Session(e)
    }
}

impl From<MapError> for CliError {
    fn from(e: MapError) -> Self {
        CliError::Map(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

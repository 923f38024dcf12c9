//! Logging setup and once-per-cause reporting.
//!
//! Library code only uses `tracing` macros. Binaries call [`init`] once to
//! install a subscriber that writes to stderr and to a daily rolling file
//! under the data directory.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::Mutex;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log file name prefix inside the log directory.
const LOG_FILE_PREFIX: &str = "catmap.log";

/// Keeps the background log writer alive; drop it to flush.
pub struct LoggingGuard {
    _file: WorkerGuard,
}

/// Installs the global subscriber.
///
/// `level` is used when `RUST_LOG` is not set, e.g. `"info"` or
/// `"catmap=debug"`. Calling this twice is harmless; the second call keeps the
/// first subscriber.
pub fn init(log_dir: &Path, level: &str) -> LoggingGuard {
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init();

    LoggingGuard { _file: guard }
}

/// Remembers which failure causes were already reported.
///
/// Transient disk and network failures tend to repeat for every tile on
/// screen; only the first occurrence of each cause is logged.
#[derive(Debug, Default)]
pub struct LogOnce {
    seen: Mutex<HashSet<&'static str>>,
}

impl LogOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `message` at warn level the first time `cause` is seen.
    ///
    /// Returns true when the message was emitted.
    pub fn warn(&self, cause: &'static str, message: impl std::fmt::Display) -> bool {
        if !self.seen.lock().insert(cause) {
            return false;
        }
        warn!(cause, "{}", message);
        true
    }

    /// Number of distinct causes reported so far.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_once_reports_each_cause_once() {
        let log = LogOnce::new();
        assert!(log.warn("tile.save", "cannot save tile"));
        assert!(!log.warn("tile.save", "cannot save tile again"));
        assert!(log.warn("tile.download", "cannot download"));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let _first = init(dir.path(), "info");
        let _second = init(dir.path(), "debug");
    }
}

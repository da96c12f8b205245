//! Tracing subscriber setup.
//!
//! Log output always goes to stderr. When a log file is configured, the same
//! events are also written there through a non-blocking writer; the returned
//! [`LoggingGuard`] flushes it on drop and must be held until exit.
//!
//! `RUST_LOG`, when set, overrides the configured level.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::bundle::{BundleError, BundleResult};

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directives, e.g. `info` or `bundlekeeper=debug`.
    pub level: String,

    /// Optional file receiving a copy of the log.
    pub file: Option<PathBuf>,

    /// Colorize stderr output.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Log at `level` to stderr only.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Also write the log to `path`.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Enable or disable colored output.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

/// Keeps the file writer alive. Dropping it flushes pending log lines.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global tracing subscriber.
///
/// Fails if the filter cannot be parsed, the log file cannot be created, or
/// a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> BundleResult<LoggingGuard> {
    let directives = match std::env::var("RUST_LOG") {
        Ok(env) if !env.trim().is_empty() => env,
        _ => config.level.clone(),
    };
    let filter = parse_filter(&directives)?;

    let (file_layer, file_guard) = match &config.file {
        Some(path) => {
            let file = open_log_file(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_ansi(config.ansi)
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BundleError::InvalidConfig(format!("logging already initialized: {}", e)))?;

    Ok(LoggingGuard { _file: file_guard })
}

fn parse_filter(directives: &str) -> BundleResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| BundleError::InvalidConfig(format!("invalid log filter '{}': {}", directives, e)))
}

fn open_log_file(path: &std::path::Path) -> BundleResult<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| BundleError::CreateDirFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BundleError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("warn,bundlekeeper=debug").is_ok());
        assert!(parse_filter("bundlekeeper=loud").is_err());
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("debug")
            .with_file("/tmp/bundlekeeper.log")
            .with_ansi(false);
        assert_eq!(config.level, "debug");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/bundlekeeper.log")));
        assert!(!config.ansi);
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs").join("bundlekeeper.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}

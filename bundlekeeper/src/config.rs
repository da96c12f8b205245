//! Provisioner configuration.
//!
//! Settings can be built in code or read from the `[bundles]` section of an
//! INI file:
//!
//! ```ini
//! [bundles]
//! directory = /var/lib/myapp/bundles
//! buffer_size = 65536
//! timeout_secs = 300
//! unsafe_entries = skip
//! ```
//!
//! Missing keys keep their defaults. A relative `directory` is resolved
//! against the directory containing the INI file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use crate::bundle::{
    BundleError, BundleResult, HttpConnectionSupplier, UnsafeEntryPolicy, DEFAULT_BUFFER_SIZE,
    DEFAULT_TIMEOUT_SECS,
};

/// INI section holding the provisioner settings.
pub const INI_SECTION: &str = "bundles";

/// Configuration for a [`crate::bundle::BundleController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Root directory holding the master and update generations.
    pub bundles_dir: PathBuf,

    /// Copy buffer size for downloads, in bytes.
    pub buffer_size: usize,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// What to do with archive entries that escape the extraction directory.
    pub unsafe_entries: UnsafeEntryPolicy,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            bundles_dir: PathBuf::from("bundles"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            unsafe_entries: UnsafeEntryPolicy::default(),
        }
    }
}

impl ProvisionerConfig {
    /// Create a configuration for the given bundles directory.
    pub fn new(bundles_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundles_dir: bundles_dir.into(),
            ..Default::default()
        }
    }

    /// Set the download buffer size.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the unsafe entry policy.
    pub fn with_unsafe_entries(mut self, policy: UnsafeEntryPolicy) -> Self {
        self.unsafe_entries = policy;
        self
    }

    /// Load settings from an INI file.
    pub fn from_ini_file(path: &Path) -> BundleResult<Self> {
        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(source) => BundleError::ReadFailed {
                path: path.to_path_buf(),
                source,
            },
            ini::Error::Parse(e) => {
                BundleError::InvalidConfig(format!("{}: {}", path.display(), e))
            }
        })?;

        let mut config = Self::from_ini(&ini)?;
        if config.bundles_dir.is_relative() {
            if let Some(base) = path.parent() {
                config.bundles_dir = base.join(&config.bundles_dir);
            }
        }
        Ok(config)
    }

    /// Parse settings from INI text.
    pub fn from_ini_str(text: &str) -> BundleResult<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| BundleError::InvalidConfig(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> BundleResult<Self> {
        let mut config = Self::default();
        let Some(section) = ini.section(Some(INI_SECTION)) else {
            return Ok(config);
        };

        if let Some(dir) = section.get("directory") {
            let dir = dir.trim();
            if dir.is_empty() {
                return Err(BundleError::InvalidConfig(
                    "bundles.directory must not be empty".to_string(),
                ));
            }
            config.bundles_dir = PathBuf::from(dir);
        }
        if let Some(size) = parse_key::<usize>(section, "buffer_size")? {
            if size == 0 {
                return Err(BundleError::InvalidConfig(
                    "bundles.buffer_size must be greater than zero".to_string(),
                ));
            }
            config.buffer_size = size;
        }
        if let Some(secs) = parse_key::<u64>(section, "timeout_secs")? {
            if secs == 0 {
                return Err(BundleError::InvalidConfig(
                    "bundles.timeout_secs must be greater than zero".to_string(),
                ));
            }
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = section.get("unsafe_entries") {
            config.unsafe_entries = policy.parse()?;
        }

        Ok(config)
    }

    /// Build an HTTP connection supplier for `url` using this timeout.
    pub fn supplier(&self, url: impl Into<String>) -> BundleResult<HttpConnectionSupplier> {
        HttpConnectionSupplier::with_timeout(url, self.timeout)
    }
}

fn parse_key<T: FromStr>(section: &Properties, key: &str) -> BundleResult<Option<T>> {
    section
        .get(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| {
                BundleError::InvalidConfig(format!(
                    "invalid value for {}.{}: '{}'",
                    INI_SECTION, key, value
                ))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.buffer_size, 64 * 1024);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.unsafe_entries, UnsafeEntryPolicy::Skip);
    }

    #[test]
    fn test_builder() {
        let config = ProvisionerConfig::new("/data/bundles")
            .with_buffer_size(1024)
            .with_timeout(Duration::from_secs(5))
            .with_unsafe_entries(UnsafeEntryPolicy::Abort);

        assert_eq!(config.bundles_dir, PathBuf::from("/data/bundles"));
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.unsafe_entries, UnsafeEntryPolicy::Abort);
    }

    #[test]
    fn test_from_ini_str() {
        let config = ProvisionerConfig::from_ini_str(
            "[bundles]\n\
             directory = /srv/bundles\n\
             buffer_size = 8192\n\
             timeout_secs = 30\n\
             unsafe_entries = abort\n",
        )
        .unwrap();

        assert_eq!(config.bundles_dir, PathBuf::from("/srv/bundles"));
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.unsafe_entries, UnsafeEntryPolicy::Abort);
    }

    #[test]
    fn test_missing_keys_keep_defaults() {
        let config = ProvisionerConfig::from_ini_str("[bundles]\ntimeout_secs = 10\n").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);

        let config = ProvisionerConfig::from_ini_str("[other]\nkey = value\n").unwrap();
        assert_eq!(config, ProvisionerConfig::default());
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        for text in [
            "[bundles]\nbuffer_size = lots\n",
            "[bundles]\nbuffer_size = 0\n",
            "[bundles]\ntimeout_secs = -1\n",
            "[bundles]\nunsafe_entries = ignore\n",
            "[bundles]\ndirectory =\n",
        ] {
            let err = ProvisionerConfig::from_ini_str(text).unwrap_err();
            assert!(
                matches!(err, BundleError::InvalidConfig(_)),
                "{text:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_relative_directory_resolves_against_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[bundles]\ndirectory = data/bundles\n").unwrap();

        let config = ProvisionerConfig::from_ini_file(&path).unwrap();

        assert_eq!(config.bundles_dir, temp.path().join("data/bundles"));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = ProvisionerConfig::from_ini_file(&temp.path().join("absent.ini")).unwrap_err();
        assert!(matches!(err, BundleError::ReadFailed { .. }));
    }

    #[test]
    fn test_supplier_uses_timeout() {
        let config = ProvisionerConfig::default().with_timeout(Duration::from_secs(7));
        let supplier = config.supplier("http://localhost/bundle.zip").unwrap();
        assert_eq!(supplier.url(), "http://localhost/bundle.zip");
        assert_eq!(supplier.timeout, Duration::from_secs(7));
    }
}

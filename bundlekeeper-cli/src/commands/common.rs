//! Common types and utilities shared across CLI commands.

use std::path::PathBuf;

use bundlekeeper::bundle::UpdateMode;
use bundlekeeper::config::ProvisionerConfig;
use clap::ValueEnum;

use crate::error::CliError;

/// Update mode selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    /// Block until the requested version is installed
    Mandatory,
    /// Serve a stale bundle while the update downloads
    Optional,
    /// Download in the background and apply on a later run
    Postponed,
}

impl From<ModeArg> for UpdateMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Mandatory => UpdateMode::Mandatory,
            ModeArg::Optional => UpdateMode::Optional,
            ModeArg::Postponed => UpdateMode::Postponed,
        }
    }
}

/// Resolve provisioner settings from CLI args and config file.
///
/// `--bundles-dir` takes precedence over the config file.
pub fn load_config(
    config_path: Option<&PathBuf>,
    bundles_dir: Option<&PathBuf>,
) -> Result<ProvisionerConfig, CliError> {
    let mut config = match config_path {
        Some(path) => ProvisionerConfig::from_ini_file(path)?,
        None => ProvisionerConfig::default(),
    };

    if let Some(dir) = bundles_dir {
        config.bundles_dir = dir.clone();
    }
    Ok(config)
}

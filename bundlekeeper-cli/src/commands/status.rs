//! Status command - show the generations on disk.

use std::fs;

use bundlekeeper::bundle::{BundleLayout, BundleResult, Generation};
use bundlekeeper::config::ProvisionerConfig;
use console::style;

use crate::error::CliError;

/// Snapshot of a bundles directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub master: Option<String>,
    pub update: Option<String>,
    /// Bytes of a partial download waiting to be resumed.
    pub partial_bytes: Option<u64>,
    /// Whether the partial download can be resumed.
    pub resumable: bool,
}

impl Status {
    /// Read the current state of `layout`.
    pub fn read(layout: &BundleLayout) -> BundleResult<Self> {
        Ok(Self {
            master: layout.version(Generation::Master)?,
            update: layout.version(Generation::Update)?,
            partial_bytes: fs::metadata(layout.archive_file()).ok().map(|m| m.len()),
            resumable: layout.etag_file().is_file(),
        })
    }
}

/// Run the status command.
pub fn run(config: &ProvisionerConfig) -> Result<(), CliError> {
    let layout = BundleLayout::new(&config.bundles_dir);
    let status = Status::read(&layout)?;

    println!("Bundles: {}", layout.root().display());
    println!(
        "  Master: {}",
        status
            .master
            .as_deref()
            .map(|v| style(v).green().to_string())
            .unwrap_or_else(|| style("none").dim().to_string())
    );
    println!(
        "  Update: {}",
        status
            .update
            .as_deref()
            .map(|v| style(v).yellow().to_string())
            .unwrap_or_else(|| style("none").dim().to_string())
    );
    if let Some(bytes) = status.partial_bytes {
        println!(
            "  Partial download: {} bytes ({})",
            bytes,
            if status.resumable {
                "resumable"
            } else {
                "restarts from scratch"
            }
        );
    }
    Ok(())
}

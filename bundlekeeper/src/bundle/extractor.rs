//! ZIP extraction into a staging directory.
//!
//! Every entry name is resolved lexically against the canonical staging
//! directory before anything is written for it. Names that escape the
//! directory (`../evil.txt`, absolute paths) are never written; depending on
//! [`UnsafeEntryPolicy`] they are skipped or abort the extraction.
//!
//! Entries that resolve to a path already written are skipped so a later
//! entry can never overwrite an earlier one (first write wins).

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};
use zip::ZipArchive;

use super::error::{BundleError, BundleResult};

/// What to do with an entry that resolves outside the staging directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsafeEntryPolicy {
    /// Log and ignore the entry; keep extracting the rest.
    #[default]
    Skip,
    /// Fail the whole extraction with [`BundleError::UnsafeEntry`].
    Abort,
}

impl fmt::Display for UnsafeEntryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("skip"),
            Self::Abort => f.write_str("abort"),
        }
    }
}

impl FromStr for UnsafeEntryPolicy {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(BundleError::InvalidConfig(format!(
                "unknown unsafe entry policy '{}', expected skip or abort",
                other
            ))),
        }
    }
}

/// Counters describing a finished extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Regular files written.
    pub files_written: usize,
    /// Entries ignored because they escaped the staging directory.
    pub unsafe_skipped: usize,
    /// Entries ignored because their path was already written.
    pub duplicates_skipped: usize,
}

/// How an extraction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// All entries were processed.
    Completed(ExtractSummary),
    /// The stop check fired between entries.
    Stopped,
}

/// Extracts ZIP archives with path-traversal protection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor {
    policy: UnsafeEntryPolicy,
}

impl ZipExtractor {
    /// Create an extractor that skips unsafe entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an extractor with the given unsafe entry policy.
    pub fn with_policy(policy: UnsafeEntryPolicy) -> Self {
        Self { policy }
    }

    /// The configured unsafe entry policy.
    pub fn policy(&self) -> UnsafeEntryPolicy {
        self.policy
    }

    /// Extract `archive` into `staging_dir`.
    ///
    /// `should_stop` is consulted before each entry. When it returns `true`
    /// extraction halts and whatever was written so far stays in
    /// `staging_dir`.
    pub fn extract(
        &self,
        archive: &Path,
        staging_dir: &Path,
        should_stop: &dyn Fn() -> bool,
    ) -> BundleResult<ExtractOutcome> {
        fs::create_dir_all(staging_dir).map_err(|e| BundleError::CreateDirFailed {
            path: staging_dir.to_path_buf(),
            source: e,
        })?;
        let root = fs::canonicalize(staging_dir).map_err(|e| BundleError::ReadFailed {
            path: staging_dir.to_path_buf(),
            source: e,
        })?;

        let file = File::open(archive).map_err(|e| BundleError::ReadFailed {
            path: archive.to_path_buf(),
            source: e,
        })?;
        let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| {
            BundleError::ExtractionFailed {
                path: archive.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let mut summary = ExtractSummary::default();
        let mut written: HashSet<PathBuf> = HashSet::new();

        for index in 0..zip.len() {
            if should_stop() {
                debug!(index, "Extraction stopped");
                return Ok(ExtractOutcome::Stopped);
            }

            let mut entry = zip
                .by_index(index)
                .map_err(|e| BundleError::ExtractionFailed {
                    path: archive.to_path_buf(),
                    reason: e.to_string(),
                })?;
            let name = entry.name().to_string();

            let Some(target) = resolve_entry_path(&root, &name) else {
                match self.policy {
                    UnsafeEntryPolicy::Skip => {
                        warn!(entry = %name, "Skipping archive entry outside extraction directory");
                        summary.unsafe_skipped += 1;
                        continue;
                    }
                    UnsafeEntryPolicy::Abort => {
                        return Err(BundleError::UnsafeEntry { name });
                    }
                }
            };

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| BundleError::CreateDirFailed {
                    path: target.clone(),
                    source: e,
                })?;
                continue;
            }

            if written.contains(&target) {
                warn!(entry = %name, "Skipping duplicate archive entry");
                summary.duplicates_skipped += 1;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| BundleError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            let out = match OpenOptions::new().write(true).create_new(true).open(&target) {
                Ok(out) => out,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!(entry = %name, "Skipping archive entry that collides with an existing path");
                    summary.duplicates_skipped += 1;
                    continue;
                }
                Err(e) => {
                    return Err(BundleError::WriteFailed {
                        path: target,
                        source: e,
                    })
                }
            };

            let mut writer = BufWriter::new(out);
            io::copy(&mut entry, &mut writer).map_err(|e| BundleError::ExtractionFailed {
                path: target.clone(),
                reason: e.to_string(),
            })?;
            writer.flush().map_err(|e| BundleError::WriteFailed {
                path: target.clone(),
                source: e,
            })?;

            written.insert(target);
            summary.files_written += 1;
        }

        debug!(
            files = summary.files_written,
            unsafe_skipped = summary.unsafe_skipped,
            duplicates_skipped = summary.duplicates_skipped,
            "Extraction complete"
        );
        Ok(ExtractOutcome::Completed(summary))
    }
}

/// Resolve an entry name under `root` without touching the filesystem.
///
/// Returns `None` when the name is absolute, climbs above `root`, or
/// resolves to `root` itself.
pub fn resolve_entry_path(root: &Path, name: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();

    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    // Component-wise comparison: root plus at least one more component.
    if resolved.starts_with(root) && resolved != root {
        Some(resolved)
    } else {
        None
    }
}

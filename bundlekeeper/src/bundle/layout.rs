//! On-disk layout of bundle generations.
//!
//! Given a bundles root directory the layout is:
//!
//! ```text
//! bundles/
//! ├── master/             currently served content
//! ├── master.version      UTF-8 version string
//! ├── update/             completed download waiting for promotion
//! ├── update.version
//! ├── update.zip          (transient) raw archive being downloaded
//! ├── update.etag         (transient) entity tag for resumption
//! └── update.output/      (transient) extraction staging directory
//! ```
//!
//! A generation exists only when both its directory and its version marker
//! exist. Markers are removed before directories and written after them, so
//! an interrupted operation never leaves a marker pointing at partial content.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::error::{BundleError, BundleResult};

/// Suffix of a generation's version marker.
pub const VERSION_SUFFIX: &str = ".version";

/// Suffix of the downloaded archive next to its target directory.
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// Suffix of the entity tag marker next to its target directory.
pub const ETAG_SUFFIX: &str = ".etag";

/// Suffix of the extraction staging directory next to its target directory.
pub const STAGING_SUFFIX: &str = ".output";

/// The two roles a bundle on disk can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// The complete bundle currently being served.
    Master,
    /// A bundle prepared to replace master.
    Update,
}

impl Generation {
    /// Directory name of this generation under the bundles root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Append `suffix` to the final component of `path`.
///
/// `bundles/update` with `.zip` becomes `bundles/update.zip`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Paths and marker bookkeeping for a bundles root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLayout {
    root: PathBuf,
}

impl BundleLayout {
    /// Create a layout rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The bundles root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content directory of a generation.
    pub fn dir(&self, generation: Generation) -> PathBuf {
        self.root.join(generation.dir_name())
    }

    /// Version marker of a generation.
    pub fn version_file(&self, generation: Generation) -> PathBuf {
        with_suffix(&self.dir(generation), VERSION_SUFFIX)
    }

    /// Archive file used while downloading the update.
    pub fn archive_file(&self) -> PathBuf {
        with_suffix(&self.dir(Generation::Update), ARCHIVE_SUFFIX)
    }

    /// Entity tag marker used while downloading the update.
    pub fn etag_file(&self) -> PathBuf {
        with_suffix(&self.dir(Generation::Update), ETAG_SUFFIX)
    }

    /// Extraction staging directory for the update.
    pub fn staging_dir(&self) -> PathBuf {
        with_suffix(&self.dir(Generation::Update), STAGING_SUFFIX)
    }

    /// Create the bundles root if it does not exist yet.
    pub fn ensure_root(&self) -> BundleResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| BundleError::CreateDirFailed {
            path: self.root.clone(),
            source: e,
        })
    }

    /// Version of a generation, or `None` if it is not complete on disk.
    pub fn version(&self, generation: Generation) -> BundleResult<Option<String>> {
        let dir = self.dir(generation);
        let marker = self.version_file(generation);

        if !dir.is_dir() {
            return Ok(None);
        }

        match fs::read_to_string(&marker) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BundleError::ReadFailed {
                path: marker,
                source: e,
            }),
        }
    }

    /// Whether a generation is complete on disk.
    pub fn exists(&self, generation: Generation) -> BundleResult<bool> {
        Ok(self.version(generation)?.is_some())
    }

    /// Persist a generation's version marker.
    ///
    /// The marker is written to a temporary sibling and renamed into place.
    pub fn write_version(&self, generation: Generation, version: &str) -> BundleResult<()> {
        let marker = self.version_file(generation);
        let tmp = with_suffix(&marker, ".tmp");

        fs::write(&tmp, version).map_err(|e| BundleError::WriteFailed {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &marker).map_err(|e| BundleError::WriteFailed {
            path: marker,
            source: e,
        })
    }

    /// Remove a generation: marker first, then content directory.
    pub fn remove(&self, generation: Generation) -> BundleResult<()> {
        remove_file_if_exists(&self.version_file(generation))?;
        remove_dir_if_exists(&self.dir(generation))
    }

    /// Replace master with the completed update.
    ///
    /// Returns `false` when no complete update exists. The old master is
    /// only removed once the update has been verified to be complete.
    pub fn promote_update(&self) -> BundleResult<bool> {
        let Some(version) = self.version(Generation::Update)? else {
            return Ok(false);
        };

        self.remove(Generation::Master)?;

        let from = self.dir(Generation::Update);
        let to = self.dir(Generation::Master);
        fs::rename(&from, &to).map_err(|e| BundleError::PromotionFailed {
            from: from.clone(),
            to: to.clone(),
            source: e,
        })?;

        // The master marker is in place before the update marker goes, so a
        // crash in between leaves only an orphaned update marker behind.
        let from_marker = self.version_file(Generation::Update);
        self.write_version(Generation::Master, &version)
            .map_err(|e| match e {
                BundleError::WriteFailed { path, source } => BundleError::PromotionFailed {
                    from: from_marker.clone(),
                    to: path,
                    source,
                },
                other => other,
            })?;
        remove_file_if_exists(&from_marker)?;

        tracing::info!(version = %version, dir = %to.display(), "Promoted update to master");
        Ok(true)
    }
}

/// Remove a file, treating "not found" as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> BundleResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BundleError::RemoveFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Recursively remove a directory, treating "not found" as success.
pub(crate) fn remove_dir_if_exists(path: &Path) -> BundleResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BundleError::RemoveFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn install(layout: &BundleLayout, generation: Generation, version: &str, file: &str) {
        let dir = layout.dir(generation);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.html"), file).unwrap();
        layout.write_version(generation, version).unwrap();
    }

    #[test]
    fn test_paths() {
        let layout = BundleLayout::new("/data/bundles");
        assert_eq!(
            layout.dir(Generation::Master),
            PathBuf::from("/data/bundles/master")
        );
        assert_eq!(
            layout.version_file(Generation::Master),
            PathBuf::from("/data/bundles/master.version")
        );
        assert_eq!(
            layout.version_file(Generation::Update),
            PathBuf::from("/data/bundles/update.version")
        );
        assert_eq!(
            layout.archive_file(),
            PathBuf::from("/data/bundles/update.zip")
        );
        assert_eq!(layout.etag_file(), PathBuf::from("/data/bundles/update.etag"));
        assert_eq!(
            layout.staging_dir(),
            PathBuf::from("/data/bundles/update.output")
        );
    }

    #[test]
    fn test_generation_requires_dir_and_marker() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path());

        assert_eq!(layout.version(Generation::Master).unwrap(), None);

        fs::create_dir_all(layout.dir(Generation::Master)).unwrap();
        assert_eq!(layout.version(Generation::Master).unwrap(), None);

        layout.write_version(Generation::Master, "1.0.0").unwrap();
        assert_eq!(
            layout.version(Generation::Master).unwrap().as_deref(),
            Some("1.0.0")
        );

        fs::remove_dir_all(layout.dir(Generation::Master)).unwrap();
        assert!(!layout.exists(Generation::Master).unwrap());
    }

    #[test]
    fn test_version_is_trimmed() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path());
        fs::create_dir_all(layout.dir(Generation::Update)).unwrap();
        fs::write(layout.version_file(Generation::Update), "2.0.0\n").unwrap();

        assert_eq!(
            layout.version(Generation::Update).unwrap().as_deref(),
            Some("2.0.0")
        );
    }

    #[test]
    fn test_remove_generation() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path());
        install(&layout, Generation::Update, "1.0.0", "a");

        layout.remove(Generation::Update).unwrap();

        assert!(!layout.dir(Generation::Update).exists());
        assert!(!layout.version_file(Generation::Update).exists());

        // Removing again is fine
        layout.remove(Generation::Update).unwrap();
    }

    #[test]
    fn test_promote_replaces_master() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path());
        install(&layout, Generation::Master, "1.0.0", "old");
        install(&layout, Generation::Update, "2.0.0", "new");

        assert!(layout.promote_update().unwrap());

        assert_eq!(
            layout.version(Generation::Master).unwrap().as_deref(),
            Some("2.0.0")
        );
        assert_eq!(layout.version(Generation::Update).unwrap(), None);
        let served =
            fs::read_to_string(layout.dir(Generation::Master).join("index.html")).unwrap();
        assert_eq!(served, "new");
    }

    #[test]
    fn test_promote_without_update() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path());
        install(&layout, Generation::Master, "1.0.0", "old");

        assert!(!layout.promote_update().unwrap());
        assert_eq!(
            layout.version(Generation::Master).unwrap().as_deref(),
            Some("1.0.0")
        );
    }

    #[test]
    fn test_promote_ignores_incomplete_update() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path());
        install(&layout, Generation::Master, "1.0.0", "old");
        // Directory without marker: not a generation
        fs::create_dir_all(layout.dir(Generation::Update)).unwrap();

        assert!(!layout.promote_update().unwrap());
        assert!(layout.exists(Generation::Master).unwrap());
    }

    #[test]
    fn test_failed_master_marker_keeps_update_marker() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path());
        install(&layout, Generation::Master, "1.0.0", "old");
        install(&layout, Generation::Update, "2.0.0", "new");
        // Occupy the temporary marker path so the master marker cannot be written
        fs::create_dir_all(with_suffix(&layout.version_file(Generation::Master), ".tmp")).unwrap();

        let err = layout.promote_update().unwrap_err();

        assert!(matches!(err, BundleError::PromotionFailed { .. }));
        assert!(err.is_fatal());
        assert_eq!(
            fs::read_to_string(layout.version_file(Generation::Update)).unwrap(),
            "2.0.0"
        );
        assert!(layout.dir(Generation::Master).join("index.html").exists());
    }

    #[test]
    fn test_orphaned_update_marker_is_not_a_generation() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path());
        install(&layout, Generation::Master, "2.0.0", "new");
        // State after a crash between writing master.version and removing update.version
        fs::write(layout.version_file(Generation::Update), "2.0.0").unwrap();

        assert_eq!(
            layout.version(Generation::Master).unwrap().as_deref(),
            Some("2.0.0")
        );
        assert_eq!(layout.version(Generation::Update).unwrap(), None);
        assert!(!layout.promote_update().unwrap());

        layout.remove(Generation::Update).unwrap();
        assert!(!layout.version_file(Generation::Update).exists());
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix(Path::new("/a/update"), ".zip"),
            PathBuf::from("/a/update.zip")
        );
        assert_eq!(
            with_suffix(Path::new("master.version"), ".tmp"),
            PathBuf::from("master.version.tmp")
        );
    }
}

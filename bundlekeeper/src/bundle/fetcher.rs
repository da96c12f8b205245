//! Resumable download and staged extraction of a single bundle archive.
//!
//! A [`BundleFetcher`] turns a connection to a ZIP resource into a populated
//! target directory. It works with three artifacts next to the target:
//!
//! - `<target>.zip` - the raw archive, appended to when resuming
//! - `<target>.etag` - the entity tag that makes the archive resumable
//! - `<target>.output/` - the extraction staging directory
//!
//! The staging directory is renamed onto the target as the very last step,
//! so the target either does not exist or is complete.
//!
//! # Example
//!
//! ```ignore
//! use bundlekeeper::bundle::{BundleFetcher, FetchOutcome, HttpConnectionSupplier};
//!
//! let supplier = HttpConnectionSupplier::new("https://example.com/app.zip")?;
//! let fetcher = BundleFetcher::new();
//! let outcome = fetcher.start(&supplier, "bundles/update".as_ref(), &mut |total, read| {
//!     println!("{read} of {total:?}");
//! })?;
//! assert_eq!(outcome, FetchOutcome::Completed);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::connection::{ConnectionSupplier, Response};
use super::error::{BundleError, BundleResult};
use super::extractor::{ExtractOutcome, UnsafeEntryPolicy, ZipExtractor};
use super::layout::{
    remove_dir_if_exists, remove_file_if_exists, with_suffix, ARCHIVE_SUFFIX, ETAG_SUFFIX,
    STAGING_SUFFIX,
};

/// Default copy buffer size (64KB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

const STATUS_OK: u16 = 200;
const STATUS_PARTIAL_CONTENT: u16 = 206;
const STATUS_RANGE_NOT_SATISFIABLE: u16 = 416;

/// Lifecycle of a single-use fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// `start` has not been called.
    NotStarted,
    /// `start` is in progress.
    Running,
    /// The target directory was populated.
    Completed,
    /// `stop` was observed; resumable artifacts were kept.
    Stopped,
    /// `start` returned an error.
    Failed,
}

/// Successful results of [`BundleFetcher::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The target directory now holds the archive contents.
    Completed,
    /// Stopped at a chunk or entry boundary; nothing was promoted.
    Stopped,
}

/// Cloneable handle that asks a running fetch to stop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Artifact paths derived from a target directory.
#[derive(Debug, Clone)]
struct Artifacts {
    archive: PathBuf,
    etag: PathBuf,
    staging: PathBuf,
}

impl Artifacts {
    fn for_target(target: &Path) -> Self {
        Self {
            archive: with_suffix(target, ARCHIVE_SUFFIX),
            etag: with_suffix(target, ETAG_SUFFIX),
            staging: with_suffix(target, STAGING_SUFFIX),
        }
    }

    /// Delete archive and entity tag together.
    fn discard_download(&self) -> BundleResult<()> {
        remove_file_if_exists(&self.archive)?;
        remove_file_if_exists(&self.etag)
    }
}

/// Downloads, extracts and promotes one bundle archive.
///
/// A fetcher is single-use: `start` may be called once, and not at all
/// after `stop`.
pub struct BundleFetcher {
    extractor: ZipExtractor,
    buffer_size: usize,
    stop: StopHandle,
    state: Mutex<FetchState>,
    /// Called with the entry index before each extraction stop check.
    #[cfg(test)]
    extract_checkpoint: Option<Box<dyn Fn(usize) + Send + Sync>>,
}

impl std::fmt::Debug for BundleFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleFetcher")
            .field("extractor", &self.extractor)
            .field("buffer_size", &self.buffer_size)
            .field("stop", &self.stop)
            .field("state", &self.state)
            .finish()
    }
}

impl Default for BundleFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleFetcher {
    /// Create a fetcher with the default buffer size and unsafe entry policy.
    pub fn new() -> Self {
        Self {
            extractor: ZipExtractor::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            stop: StopHandle::default(),
            state: Mutex::new(FetchState::NotStarted),
            #[cfg(test)]
            extract_checkpoint: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_extract_checkpoint(
        mut self,
        checkpoint: impl Fn(usize) + Send + Sync + 'static,
    ) -> Self {
        self.extract_checkpoint = Some(Box::new(checkpoint));
        self
    }

    /// Set the copy buffer size (minimum 1 byte).
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Set the policy for archive entries escaping the staging directory.
    pub fn with_unsafe_entries(mut self, policy: UnsafeEntryPolicy) -> Self {
        self.extractor = ZipExtractor::with_policy(policy);
        self
    }

    /// Handle that can stop this fetcher from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask an in-progress `start` to stop at the next chunk or entry.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FetchState {
        *self.lock_state()
    }

    /// Download the archive and populate `target_dir` with its contents.
    ///
    /// `on_progress(total, read)` is called after every chunk, where `total`
    /// is the full archive size when known and `read` includes any resumed
    /// prefix.
    pub fn start(
        &self,
        supplier: &dyn ConnectionSupplier,
        target_dir: &Path,
        on_progress: &mut dyn FnMut(Option<u64>, u64),
    ) -> BundleResult<FetchOutcome> {
        self.begin()?;

        let result = self.run(supplier, target_dir, on_progress);

        *self.lock_state() = match &result {
            Ok(FetchOutcome::Completed) => FetchState::Completed,
            Ok(FetchOutcome::Stopped) => FetchState::Stopped,
            Err(_) => FetchState::Failed,
        };
        result
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FetchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> BundleResult<()> {
        let mut state = self.lock_state();
        if *state != FetchState::NotStarted {
            return Err(BundleError::IllegalState(format!(
                "fetcher already used (state {:?})",
                *state
            )));
        }
        if self.stop.is_stopped() {
            return Err(BundleError::IllegalState(
                "fetcher was stopped before it started".to_string(),
            ));
        }
        *state = FetchState::Running;
        Ok(())
    }

    fn run(
        &self,
        supplier: &dyn ConnectionSupplier,
        target: &Path,
        on_progress: &mut dyn FnMut(Option<u64>, u64),
    ) -> BundleResult<FetchOutcome> {
        if target.exists() {
            return Err(BundleError::IllegalState(format!(
                "target {} already exists",
                target.display()
            )));
        }

        let artifacts = Artifacts::for_target(target);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BundleError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        if self.download(supplier, &artifacts, on_progress)? == FetchOutcome::Stopped {
            info!(archive = %artifacts.archive.display(), "Download stopped, keeping partial archive");
            return Ok(FetchOutcome::Stopped);
        }

        if self.extract(&artifacts)? == FetchOutcome::Stopped {
            info!(target = %target.display(), "Extraction stopped before promotion");
            return Ok(FetchOutcome::Stopped);
        }

        artifacts.discard_download()?;
        fs::rename(&artifacts.staging, target).map_err(|e| BundleError::PromotionFailed {
            from: artifacts.staging.clone(),
            to: target.to_path_buf(),
            source: e,
        })?;

        info!(target = %target.display(), "Bundle fetched");
        Ok(FetchOutcome::Completed)
    }

    /// Resume offset and entity tag, if the archive on disk is resumable.
    fn resume_point(&self, artifacts: &Artifacts) -> BundleResult<Option<(u64, String)>> {
        let archive_len = fs::metadata(&artifacts.archive).ok().map(|m| m.len());
        let etag = match fs::read_to_string(&artifacts.etag) {
            Ok(tag) => Some(tag.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(BundleError::ReadFailed {
                    path: artifacts.etag.clone(),
                    source: e,
                })
            }
        };

        match (archive_len, etag) {
            (Some(len), Some(tag)) if len > 0 && !tag.is_empty() => Ok(Some((len, tag))),
            (None, None) => Ok(None),
            _ => {
                debug!("Discarding download artifacts that cannot be resumed");
                artifacts.discard_download()?;
                Ok(None)
            }
        }
    }

    fn download(
        &self,
        supplier: &dyn ConnectionSupplier,
        artifacts: &Artifacts,
        on_progress: &mut dyn FnMut(Option<u64>, u64),
    ) -> BundleResult<FetchOutcome> {
        let mut restarted = false;
        let (resume, url, mut response) = loop {
            let resume = self.resume_point(artifacts)?;

            let mut connection = supplier.connect()?;
            if let Some((offset, etag)) = &resume {
                debug!(offset, etag = %etag, "Resuming download");
                connection.set_request_header("Range", &format!("bytes={}-", offset));
                connection.set_request_header("If-Range", etag);
            }
            let url = connection.url().to_string();
            let response = connection.open()?;

            // The stored prefix does not fit the resource: start over once.
            if response.status() == STATUS_RANGE_NOT_SATISFIABLE && resume.is_some() && !restarted {
                warn!(url = %url, "Server rejected resume range, discarding partial archive");
                artifacts.discard_download()?;
                restarted = true;
                continue;
            }

            // A partial body must continue exactly where the stored prefix ends.
            if response.status() == STATUS_PARTIAL_CONTENT {
                let expected = resume.as_ref().map(|(o, _)| *o).unwrap_or(0);
                let content_range = response.header("Content-Range");
                let start = content_range.as_deref().map(content_range_start);
                if let Some(start) = start {
                    if start != Some(expected) {
                        if restarted {
                            return Err(BundleError::DownloadFailed {
                                url,
                                reason: format!(
                                    "Content-Range {:?} does not start at byte {}",
                                    content_range.unwrap_or_default(),
                                    expected
                                ),
                            });
                        }
                        warn!(
                            url = %url,
                            expected,
                            content_range = ?content_range,
                            "Partial response does not match stored prefix, discarding partial archive"
                        );
                        artifacts.discard_download()?;
                        restarted = true;
                        continue;
                    }
                }
            }
            break (resume, url, response);
        };

        let status = response.status();
        let (offset, file) = match status {
            STATUS_OK => {
                let file = File::create(&artifacts.archive).map_err(|e| BundleError::WriteFailed {
                    path: artifacts.archive.clone(),
                    source: e,
                })?;
                (0, file)
            }
            STATUS_PARTIAL_CONTENT => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&artifacts.archive)
                    .map_err(|e| BundleError::WriteFailed {
                        path: artifacts.archive.clone(),
                        source: e,
                    })?;
                (resume.as_ref().map(|(o, _)| *o).unwrap_or(0), file)
            }
            _ => return Err(BundleError::UnexpectedStatus { url, status }),
        };

        self.record_etag(&*response, artifacts)?;

        let total = response.content_length().map(|len| offset + len);
        info!(url = %url, status, offset, total = ?total, "Downloading bundle archive");

        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; self.buffer_size];
        let mut read_so_far = offset;

        loop {
            let n = match response.read(&mut buffer) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    flush(&mut writer, &artifacts.archive)?;
                    return Err(BundleError::DownloadFailed {
                        url,
                        reason: format!("read error: {}", e),
                    });
                }
            };
            if n == 0 {
                break;
            }

            writer
                .write_all(&buffer[..n])
                .map_err(|e| BundleError::WriteFailed {
                    path: artifacts.archive.clone(),
                    source: e,
                })?;
            read_so_far += n as u64;

            on_progress(total, read_so_far);

            if self.stop.is_stopped() {
                flush(&mut writer, &artifacts.archive)?;
                return Ok(FetchOutcome::Stopped);
            }
        }

        flush(&mut writer, &artifacts.archive)?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| BundleError::WriteFailed {
                path: artifacts.archive.clone(),
                source: e,
            })?;

        if let Some(expected) = total {
            if read_so_far < expected {
                return Err(BundleError::IncompleteDownload {
                    expected,
                    received: read_so_far,
                });
            }
            if read_so_far > expected {
                artifacts.discard_download()?;
                return Err(BundleError::IncompleteDownload {
                    expected,
                    received: read_so_far,
                });
            }
        }

        debug!(bytes = read_so_far, "Archive fully written");
        Ok(FetchOutcome::Completed)
    }

    /// Persist or clear the entity tag depending on range support.
    fn record_etag(&self, response: &dyn Response, artifacts: &Artifacts) -> BundleResult<()> {
        let accepts_ranges = response
            .header("Accept-Ranges")
            .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        match response.header("ETag").filter(|_| accepts_ranges) {
            Some(etag) => fs::write(&artifacts.etag, etag).map_err(|e| BundleError::WriteFailed {
                path: artifacts.etag.clone(),
                source: e,
            }),
            None => remove_file_if_exists(&artifacts.etag),
        }
    }

    fn extract(&self, artifacts: &Artifacts) -> BundleResult<FetchOutcome> {
        remove_dir_if_exists(&artifacts.staging)?;

        #[cfg(test)]
        let entry = std::cell::Cell::new(0usize);
        let should_stop = || {
            #[cfg(test)]
            if let Some(checkpoint) = &self.extract_checkpoint {
                checkpoint(entry.replace(entry.get() + 1));
            }
            self.stop.is_stopped()
        };
        match self
            .extractor
            .extract(&artifacts.archive, &artifacts.staging, &should_stop)
        {
            Ok(ExtractOutcome::Completed(summary)) => {
                debug!(files = summary.files_written, "Archive extracted to staging");
                Ok(FetchOutcome::Completed)
            }
            Ok(ExtractOutcome::Stopped) => Ok(FetchOutcome::Stopped),
            Err(e) => {
                if let Err(cleanup) = remove_dir_if_exists(&artifacts.staging) {
                    warn!(error = %cleanup, "Failed to remove staging directory");
                }
                if matches!(
                    e,
                    BundleError::ExtractionFailed { .. } | BundleError::UnsafeEntry { .. }
                ) {
                    artifacts.discard_download()?;
                }
                Err(e)
            }
        }
    }
}

/// First byte position of a `Content-Range: bytes START-END/TOTAL` value.
fn content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

fn flush(writer: &mut BufWriter<File>, path: &Path) -> BundleResult<()> {
    writer.flush().map_err(|e| BundleError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

//! Reconciliation of the on-disk bundle with a requested version.
//!
//! The [`BundleController`] owns the `master`/`update` generations under a
//! bundles root. Each [`BundleController::reconcile`] call reads the current
//! generations from disk, evaluates the decision table in [`super::plan`],
//! and then serves, promotes or downloads accordingly.
//!
//! # Event order
//!
//! ```text
//! blocking download:    UpdateStarted, UpdateProgress*, BundleReady | UpdateFailed
//! background download:  BundleReady, UpdateStarted, UpdateProgress*, UpdateReady | UpdateFailed
//! no download:          BundleReady
//! ```
//!
//! # Concurrency
//!
//! At most one download runs per controller. Background downloads run on a
//! dedicated thread; the controller stops and joins that thread before it
//! touches the `update` generation again. Callers must not run two
//! `reconcile`/`promote` calls on the same bundles root at once.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::connection::ConnectionSupplier;
use super::error::{BundleError, BundleResult};
use super::events::{BundleEvent, EventSink};
use super::extractor::UnsafeEntryPolicy;
use super::fetcher::{BundleFetcher, FetchOutcome, FetchState, StopHandle};
use super::layout::{BundleLayout, Generation};
use super::mode::UpdateMode;
use super::plan::{plan, Plan};
use crate::config::ProvisionerConfig;

/// Result of a reconciliation, mirroring the events that were emitted.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// Master has the requested version and is ready to serve.
    Ready { master_dir: PathBuf },
    /// A stale master is ready to serve while the update downloads.
    ReadyUpdatingInBackground { master_dir: PathBuf },
    /// The requested version could not be made available.
    Failed { cause: Arc<BundleError> },
}

impl ReconcileOutcome {
    /// Directory to serve, if any.
    pub fn master_dir(&self) -> Option<&PathBuf> {
        match self {
            Self::Ready { master_dir } | Self::ReadyUpdatingInBackground { master_dir } => {
                Some(master_dir)
            }
            Self::Failed { .. } => None,
        }
    }

    /// Whether the failure must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Failed { cause } if cause.is_fatal())
    }
}

/// Everything a download needs, detached from the controller so it can move
/// to a worker thread.
#[derive(Clone)]
struct DownloadJob {
    layout: BundleLayout,
    buffer_size: usize,
    unsafe_entries: UnsafeEntryPolicy,
    events: Arc<dyn EventSink>,
    version: String,
    mode: UpdateMode,
}

impl DownloadJob {
    fn fetcher(&self) -> BundleFetcher {
        BundleFetcher::new()
            .with_buffer_size(self.buffer_size)
            .with_unsafe_entries(self.unsafe_entries)
    }

    /// Clear any stale update so the fetcher can populate it.
    ///
    /// The archive and entity tag are kept so the download can resume.
    fn prepare(&self) -> BundleResult<()> {
        self.layout.ensure_root()?;
        self.layout.remove(Generation::Update)
    }

    /// Fetch into the update generation and write its version marker.
    fn run(
        &self,
        fetcher: &BundleFetcher,
        supplier: &dyn ConnectionSupplier,
    ) -> BundleResult<FetchOutcome> {
        self.events.emit(BundleEvent::UpdateStarted { mode: self.mode });

        let target = self.layout.dir(Generation::Update);
        let events = &self.events;
        let result = fetcher.start(supplier, &target, &mut |content_length, read_length| {
            events.emit(BundleEvent::UpdateProgress {
                content_length,
                read_length,
            })
        });

        let outcome = match result {
            // Stopped before the fetcher got going.
            Err(BundleError::IllegalState(_))
                if fetcher.state() == FetchState::NotStarted
                    && fetcher.stop_handle().is_stopped() =>
            {
                FetchOutcome::Stopped
            }
            other => other?,
        };

        if outcome == FetchOutcome::Completed {
            self.layout
                .write_version(Generation::Update, &self.version)?;
        }
        Ok(outcome)
    }
}

/// A download running on a worker thread.
struct BackgroundDownload {
    version: String,
    stop: StopHandle,
    handle: JoinHandle<()>,
}

/// Decides when and how to update the served bundle.
pub struct BundleController {
    layout: BundleLayout,
    buffer_size: usize,
    unsafe_entries: UnsafeEntryPolicy,
    events: Arc<dyn EventSink>,
    background: Option<BackgroundDownload>,
}

impl fmt::Debug for BundleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleController")
            .field("layout", &self.layout)
            .field("buffer_size", &self.buffer_size)
            .field("unsafe_entries", &self.unsafe_entries)
            .field(
                "background",
                &self.background.as_ref().map(|b| b.version.as_str()),
            )
            .finish()
    }
}

impl BundleController {
    /// Create a controller for the bundles directory in `config`.
    pub fn new(config: &ProvisionerConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            layout: BundleLayout::new(&config.bundles_dir),
            buffer_size: config.buffer_size,
            unsafe_entries: config.unsafe_entries,
            events,
            background: None,
        }
    }

    /// The on-disk layout managed by this controller.
    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    /// Directory served as the master bundle.
    pub fn master_dir(&self) -> PathBuf {
        self.layout.dir(Generation::Master)
    }

    /// Version of the master bundle, if one is installed.
    pub fn master_version(&self) -> BundleResult<Option<String>> {
        self.layout.version(Generation::Master)
    }

    /// Version of the downloaded update, if one is complete.
    pub fn update_version(&self) -> BundleResult<Option<String>> {
        self.layout.version(Generation::Update)
    }

    /// Whether a complete update is waiting to be promoted.
    pub fn is_update_ready(&self) -> BundleResult<bool> {
        self.layout.exists(Generation::Update)
    }

    /// Whether a background download is still running.
    pub fn is_background_running(&self) -> bool {
        self.background
            .as_ref()
            .is_some_and(|b| !b.handle.is_finished())
    }

    /// Block until any background download has finished.
    pub fn wait_for_background(&mut self) {
        if let Some(background) = self.background.take() {
            if background.handle.join().is_err() {
                error!("Background download thread panicked");
            }
        }
    }

    /// Stop any background download and wait for it to exit.
    pub fn stop_background(&mut self) {
        if let Some(background) = &self.background {
            debug!(version = %background.version, "Stopping background download");
            background.stop.stop();
        }
        self.wait_for_background();
    }

    /// Apply a downloaded update without touching the network.
    ///
    /// Returns `false` when there is no complete update to promote.
    pub fn promote(&mut self) -> BundleResult<bool> {
        self.stop_background();
        self.layout.promote_update()
    }

    /// Make `version` available according to `mode`.
    ///
    /// Every outcome is also reported through the event sink; errors never
    /// escape this call.
    pub fn reconcile(
        &mut self,
        version: &str,
        mode: UpdateMode,
        supplier: Arc<dyn ConnectionSupplier>,
    ) -> ReconcileOutcome {
        match self.try_reconcile(version, mode, supplier) {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_fatal() {
                    error!(version, error = %e, "Reconciliation failed");
                } else {
                    warn!(version, error = %e, "Update failed");
                }
                let cause = Arc::new(e);
                self.events.emit(BundleEvent::UpdateFailed {
                    mode,
                    cause: Arc::clone(&cause),
                });
                ReconcileOutcome::Failed { cause }
            }
        }
    }

    fn try_reconcile(
        &mut self,
        version: &str,
        mode: UpdateMode,
        supplier: Arc<dyn ConnectionSupplier>,
    ) -> BundleResult<ReconcileOutcome> {
        if let Some(outcome) = self.continue_background(version, mode)? {
            return Ok(outcome);
        }
        self.stop_background();

        let master = self.layout.version(Generation::Master)?;
        let update = self.layout.version(Generation::Update)?;
        let plan = plan(master.as_deref(), update.as_deref(), version, mode);
        info!(
            requested = version,
            %mode,
            master = ?master,
            update = ?update,
            ?plan,
            "Reconciling bundle"
        );

        match plan {
            Plan::ServeMaster => Ok(self.ready()),
            Plan::PromoteUpdate => {
                if !self.layout.promote_update()? {
                    return Err(BundleError::IllegalState(
                        "update disappeared before promotion".to_string(),
                    ));
                }
                Ok(self.ready())
            }
            Plan::DownloadBlocking => self.download_blocking(version, mode, supplier.as_ref()),
            Plan::ServeMasterAndDownload => Ok(self.download_in_background(version, mode, supplier)),
        }
    }

    /// Keep an in-flight background download of the same version running.
    fn continue_background(
        &mut self,
        version: &str,
        mode: UpdateMode,
    ) -> BundleResult<Option<ReconcileOutcome>> {
        let Some(background) = &self.background else {
            return Ok(None);
        };
        if background.handle.is_finished() {
            self.wait_for_background();
            return Ok(None);
        }
        if background.version != version || mode == UpdateMode::Mandatory {
            return Ok(None);
        }
        match self.layout.version(Generation::Master)? {
            Some(master) if master != version => {
                debug!(version, "Background download already in progress");
                let master_dir = self.master_dir();
                self.events.emit(BundleEvent::BundleReady {
                    master_dir: master_dir.clone(),
                });
                Ok(Some(ReconcileOutcome::ReadyUpdatingInBackground { master_dir }))
            }
            _ => Ok(None),
        }
    }

    fn ready(&self) -> ReconcileOutcome {
        let master_dir = self.master_dir();
        self.events.emit(BundleEvent::BundleReady {
            master_dir: master_dir.clone(),
        });
        ReconcileOutcome::Ready { master_dir }
    }

    fn job(&self, version: &str, mode: UpdateMode) -> DownloadJob {
        DownloadJob {
            layout: self.layout.clone(),
            buffer_size: self.buffer_size,
            unsafe_entries: self.unsafe_entries,
            events: Arc::clone(&self.events),
            version: version.to_string(),
            mode,
        }
    }

    fn download_blocking(
        &mut self,
        version: &str,
        mode: UpdateMode,
        supplier: &dyn ConnectionSupplier,
    ) -> BundleResult<ReconcileOutcome> {
        let job = self.job(version, mode);
        job.prepare()?;

        let fetcher = job.fetcher();
        match job.run(&fetcher, supplier)? {
            FetchOutcome::Completed => {
                self.layout.promote_update()?;
                Ok(self.ready())
            }
            FetchOutcome::Stopped => Err(BundleError::Stopped),
        }
    }

    fn download_in_background(
        &mut self,
        version: &str,
        mode: UpdateMode,
        supplier: Arc<dyn ConnectionSupplier>,
    ) -> ReconcileOutcome {
        let master_dir = self.master_dir();
        self.events.emit(BundleEvent::BundleReady {
            master_dir: master_dir.clone(),
        });

        let job = self.job(version, mode);
        if let Err(e) = self.spawn_background(job, supplier) {
            warn!(version, error = %e, "Could not start background download");
            self.events.emit(BundleEvent::UpdateFailed {
                mode,
                cause: Arc::new(e),
            });
        }

        ReconcileOutcome::ReadyUpdatingInBackground { master_dir }
    }

    fn spawn_background(
        &mut self,
        job: DownloadJob,
        supplier: Arc<dyn ConnectionSupplier>,
    ) -> BundleResult<()> {
        job.prepare()?;

        let fetcher = job.fetcher();
        let stop = fetcher.stop_handle();
        let version = job.version.clone();

        let handle = thread::Builder::new()
            .name("bundle-download".to_string())
            .spawn(move || {
                let event = match job.run(&fetcher, supplier.as_ref()) {
                    Ok(FetchOutcome::Completed) => {
                        info!(version = %job.version, "Background update ready");
                        BundleEvent::UpdateReady {
                            version: job.version.clone(),
                        }
                    }
                    Ok(FetchOutcome::Stopped) => BundleEvent::UpdateFailed {
                        mode: job.mode,
                        cause: Arc::new(BundleError::Stopped),
                    },
                    Err(e) => {
                        warn!(version = %job.version, error = %e, "Background update failed");
                        BundleEvent::UpdateFailed {
                            mode: job.mode,
                            cause: Arc::new(e),
                        }
                    }
                };
                job.events.emit(event);
            })
            .map_err(BundleError::SpawnFailed)?;

        self.background = Some(BackgroundDownload {
            version,
            stop,
            handle,
        });
        Ok(())
    }
}

impl Drop for BundleController {
    fn drop(&mut self) {
        self.stop_background();
    }
}

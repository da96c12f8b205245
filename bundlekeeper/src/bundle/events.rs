//! Lifecycle notifications emitted during reconciliation.
//!
//! The controller reports progress and outcomes as [`BundleEvent`] values
//! pushed into an [`EventSink`]. Closures and tokio unbounded senders are
//! sinks out of the box:
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let controller = BundleController::new(&config, Arc::new(tx));
//!
//! let printer = |event: BundleEvent| println!("{event}");
//! let controller = BundleController::new(&config, Arc::new(printer));
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use super::error::BundleError;
use super::mode::UpdateMode;

/// A lifecycle notification.
#[derive(Debug, Clone)]
pub enum BundleEvent {
    /// A download is about to start; no network I/O has happened yet.
    UpdateStarted { mode: UpdateMode },
    /// Bytes were received. `read_length` includes any resumed prefix.
    UpdateProgress {
        content_length: Option<u64>,
        read_length: u64,
    },
    /// The master directory is ready to be served.
    BundleReady { master_dir: PathBuf },
    /// A background download finished; it is applied on a later reconcile.
    UpdateReady { version: String },
    /// The update could not be fetched or applied.
    UpdateFailed {
        mode: UpdateMode,
        cause: Arc<BundleError>,
    },
}

impl BundleEvent {
    /// Whether this event ends a download sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::UpdateStarted { .. } | Self::UpdateProgress { .. }
        )
    }
}

impl fmt::Display for BundleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpdateStarted { mode } => write!(f, "update started ({})", mode),
            Self::UpdateProgress {
                content_length: Some(total),
                read_length,
            } => write!(f, "downloaded {} of {} bytes", read_length, total),
            Self::UpdateProgress {
                content_length: None,
                read_length,
            } => write!(f, "downloaded {} bytes", read_length),
            Self::BundleReady { master_dir } => {
                write!(f, "bundle ready at {}", master_dir.display())
            }
            Self::UpdateReady { version } => write!(f, "update {} ready", version),
            Self::UpdateFailed { mode, cause } => {
                write!(f, "update failed ({}): {}", mode, cause)
            }
        }
    }
}

/// Receives lifecycle notifications. Must be callable from worker threads.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: BundleEvent);
}

impl<F> EventSink for F
where
    F: Fn(BundleEvent) + Send + Sync,
{
    fn emit(&self, event: BundleEvent) {
        self(event)
    }
}

impl EventSink for UnboundedSender<BundleEvent> {
    fn emit(&self, event: BundleEvent) {
        // A dropped receiver means nobody is listening anymore.
        if self.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

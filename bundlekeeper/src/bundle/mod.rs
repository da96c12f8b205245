//! Bundle provisioning.
//!
//! A bundle is a directory of content that is delivered as a ZIP archive
//! over HTTP and served from local disk. Two generations live side by side
//! under a bundles root:
//!
//! ```text
//! <root>/master/          served bundle
//! <root>/master.version   version marker for master
//! <root>/update/          downloaded, not yet promoted
//! <root>/update.version   version marker for update
//! <root>/update.zip       partial or complete archive (resumable)
//! <root>/update.etag      entity tag of update.zip
//! <root>/update.output/   extraction staging directory
//! ```
//!
//! A generation exists only when both its directory and its version marker
//! exist. [`BundleFetcher`] populates a directory from a remote archive with
//! resumable downloads; [`BundleController`] decides when to fetch and when
//! to promote `update` to `master`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bundlekeeper::bundle::{BundleController, ReconcileOutcome, UpdateMode};
//! use bundlekeeper::config::ProvisionerConfig;
//!
//! let config = ProvisionerConfig::new("/var/lib/app/bundles");
//! let supplier = Arc::new(config.supplier("https://example.com/bundle.zip")?);
//! let mut controller = BundleController::new(&config, Arc::new(|e| println!("{e}")));
//!
//! match controller.reconcile("2.0.0", UpdateMode::Optional, supplier) {
//!     ReconcileOutcome::Ready { master_dir }
//!     | ReconcileOutcome::ReadyUpdatingInBackground { master_dir } => serve(&master_dir),
//!     ReconcileOutcome::Failed { cause } => eprintln!("{cause}"),
//! }
//! ```

mod connection;
mod controller;
mod error;
mod events;
mod extractor;
mod fetcher;
mod layout;
mod mode;
mod plan;

#[cfg(test)]
mod testing;

pub use connection::{
    Connection, ConnectionSupplier, HttpConnectionSupplier, Response, DEFAULT_TIMEOUT_SECS,
};
pub use controller::{BundleController, ReconcileOutcome};
pub use error::{BundleError, BundleResult};
pub use events::{BundleEvent, EventSink};
pub use extractor::{
    resolve_entry_path, ExtractOutcome, ExtractSummary, UnsafeEntryPolicy, ZipExtractor,
};
pub use fetcher::{BundleFetcher, FetchOutcome, FetchState, StopHandle, DEFAULT_BUFFER_SIZE};
pub use layout::{BundleLayout, Generation};
pub use mode::UpdateMode;
pub use plan::{plan, Plan};

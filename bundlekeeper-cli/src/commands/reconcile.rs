//! Reconcile command - make a bundle version available locally.

use std::sync::Arc;

use bundlekeeper::bundle::{BundleController, EventSink, ReconcileOutcome, UpdateMode};
use bundlekeeper::config::ProvisionerConfig;

use crate::error::CliError;
use crate::progress::ProgressReporter;

/// Arguments for the reconcile command.
#[derive(Debug, Clone)]
pub struct ReconcileArgs {
    pub url: String,
    pub version: String,
    pub mode: UpdateMode,
    pub show_progress: bool,
}

/// Run the reconcile command.
///
/// Background downloads are awaited before returning so the process does
/// not exit with a half-finished update.
pub fn run(config: &ProvisionerConfig, args: ReconcileArgs) -> Result<(), CliError> {
    let supplier = Arc::new(config.supplier(args.url.as_str())?);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let reporter = ProgressReporter::spawn(rx, args.show_progress);
    let sink: Arc<dyn EventSink> = Arc::new(tx);

    let mut controller = BundleController::new(config, sink);
    let outcome = controller.reconcile(&args.version, args.mode, supplier);
    if matches!(outcome, ReconcileOutcome::ReadyUpdatingInBackground { .. }) {
        controller.wait_for_background();
    }
    // Closes the channel so the reporter can finish.
    drop(controller);
    let summary = reporter.finish();

    match outcome {
        ReconcileOutcome::Ready { .. } => Ok(()),
        ReconcileOutcome::ReadyUpdatingInBackground { .. } => match summary.update_failed {
            Some(msg) => Err(CliError::BackgroundUpdate(msg)),
            None => Ok(()),
        },
        ReconcileOutcome::Failed { cause } => Err(CliError::Reconcile(cause)),
    }
}

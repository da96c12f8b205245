//! Promote command - apply a downloaded update without touching the network.

use std::sync::Arc;

use bundlekeeper::bundle::{BundleController, BundleEvent};
use bundlekeeper::config::ProvisionerConfig;
use console::style;

use crate::error::CliError;

/// Run the promote command.
pub fn run(config: &ProvisionerConfig) -> Result<(), CliError> {
    let mut controller = BundleController::new(config, Arc::new(|_: BundleEvent| {}));

    if controller.promote()? {
        let version = controller.master_version()?.unwrap_or_default();
        println!(
            "{} {} is now served from {}",
            style("Promoted").green().bold(),
            version,
            controller.master_dir().display()
        );
    } else {
        println!("No downloaded update to promote.");
    }
    Ok(())
}

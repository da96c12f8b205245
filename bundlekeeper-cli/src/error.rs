//! CLI error type.

use std::fmt;
use std::sync::Arc;

use bundlekeeper::bundle::BundleError;

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid or missing configuration.
    Config(String),
    /// A library operation failed.
    Bundle(BundleError),
    /// Reconciliation finished without a servable bundle.
    Reconcile(Arc<BundleError>),
    /// A background update failed after the bundle was served.
    BackgroundUpdate(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Bundle(e) => write!(f, "{}", e),
            CliError::Reconcile(e) => write!(f, "Bundle not available: {}", e),
            CliError::BackgroundUpdate(msg) => write!(f, "Background update failed: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Bundle(e) => Some(e),
            CliError::Reconcile(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<BundleError> for CliError {
    fn from(e: BundleError) -> Self {
        match e {
            BundleError::InvalidConfig(msg) => CliError::Config(msg),
            other => CliError::Bundle(other),
        }
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Reconcile(e) if e.is_fatal() => 3,
            _ => 1,
        }
    }
}

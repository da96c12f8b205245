//! Error types for bundle provisioning.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;

/// Errors that can occur while fetching, extracting or promoting a bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file or directory.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Failed to remove a file or directory.
    #[error("failed to remove {}: {source}", path.display())]
    RemoveFailed { path: PathBuf, source: io::Error },

    /// The connection could not be opened or the body could not be read.
    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The server answered with a status other than 200 or 206.
    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// The body ended before the advertised content length was received.
    #[error("download incomplete: expected {expected} bytes, received {received}")]
    IncompleteDownload { expected: u64, received: u64 },

    /// The archive could not be read or unpacked.
    #[error("failed to extract {}: {reason}", path.display())]
    ExtractionFailed { path: PathBuf, reason: String },

    /// An archive entry resolved outside the extraction directory.
    #[error("archive entry escapes the extraction directory: {name}")]
    UnsafeEntry { name: String },

    /// An operation was invoked in a state that does not permit it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Renaming a completed update into place failed.
    #[error("failed to promote {} to {}: {source}", from.display(), to.display())]
    PromotionFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// The fetch was stopped before it completed.
    #[error("download stopped before completion")]
    Stopped,

    /// The background download thread could not be started.
    #[error("failed to spawn download worker: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl BundleError {
    /// Whether this error must abort the caller rather than be reported.
    ///
    /// Contract violations and promotion failures leave nothing sensible
    /// to retry; every other error is reported as a failed update.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PromotionFailed { .. } | Self::IllegalState(_))
    }

    /// Whether this error is a security violation raised by extraction.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::UnsafeEntry { .. })
    }
}

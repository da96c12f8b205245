//! Bundlekeeper - keeps a locally served content bundle in sync with a
//! remote ZIP archive.
//!
//! The [`bundle`] module downloads archives with ETag-validated resumption,
//! extracts them without letting entries escape the target directory, and
//! swaps new versions in with directory renames. [`config`] and [`logging`]
//! provide the ambient setup used by the command-line tool.

pub mod bundle;
pub mod config;
pub mod logging;

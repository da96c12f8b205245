//! CLI command implementations.

pub mod common;
pub mod promote;
pub mod reconcile;
pub mod status;

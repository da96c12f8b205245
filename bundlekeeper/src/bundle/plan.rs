//! Reconciliation decision table.
//!
//! Given the versions found on disk, the requested version and the update
//! mode, [`plan`] decides what a reconciliation does. The controller derives
//! the inputs from disk at the start of every call; nothing here is persisted.
//!
//! | master    | update    | mode                  | plan                        |
//! |-----------|-----------|-----------------------|-----------------------------|
//! | matches   | any       | any                   | `ServeMaster`               |
//! | any/none  | matches   | any                   | `PromoteUpdate`             |
//! | none      | stale/none| any                   | `DownloadBlocking`          |
//! | stale     | stale/none| mandatory             | `DownloadBlocking`          |
//! | stale     | stale/none| optional, postponed   | `ServeMasterAndDownload`    |

use super::mode::UpdateMode;

/// What a reconciliation should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Master already has the requested version.
    ServeMaster,
    /// A downloaded update has the requested version; promote it.
    PromoteUpdate,
    /// Download, promote, and only then report the bundle ready.
    DownloadBlocking,
    /// Report the stale master ready now and download in the background.
    ServeMasterAndDownload,
}

impl Plan {
    /// Whether this plan performs network I/O.
    pub fn downloads(&self) -> bool {
        matches!(self, Self::DownloadBlocking | Self::ServeMasterAndDownload)
    }
}

/// Evaluate the decision table.
pub fn plan(
    master: Option<&str>,
    update: Option<&str>,
    requested: &str,
    mode: UpdateMode,
) -> Plan {
    if master == Some(requested) {
        return Plan::ServeMaster;
    }
    if update == Some(requested) {
        return Plan::PromoteUpdate;
    }
    match (master, mode) {
        (None, _) | (Some(_), UpdateMode::Mandatory) => Plan::DownloadBlocking,
        (Some(_), UpdateMode::Optional | UpdateMode::Postponed) => Plan::ServeMasterAndDownload,
    }
}

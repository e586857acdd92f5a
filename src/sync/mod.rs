//! Offline-first project synchronisation.
//!
//! [`SyncEngine`] owns the project list, the open project and its working
//! graph. It reads and writes the device cache on every change and talks to
//! the remote store whenever the network is up.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    graph::GraphError,
    lock::LockError,
    models::ValidationError,
    remote::RemoteError,
};

mod engine;
pub mod merge;
mod realtime;

pub use engine::{SyncEngine, DEFAULT_PROJECT_NAME};
pub use merge::merge_projects;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("local cache failure: {0:#}")]
    Cache(anyhow::Error),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("project cannot be opened: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("project {0} is not in the project list")]
    UnknownProject(String),

    #[error("project {project_id} is being edited by {holder}")]
    ReadOnly { project_id: String, holder: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The remote store accepted the write.
    Synced,
    /// Kept on the device only, flagged `pending_sync`.
    SavedLocally,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Editable, with a lease held until `lease_expires_at`.
    Opened { lease_expires_at: DateTime<Utc> },
    /// Editable without a lease: offline, placeholder id, or remote unreachable.
    OpenedOffline,
    /// Loaded read-only; another user holds the lease.
    LockedByOther {
        holder: String,
        expires_at: DateTime<Utc>,
    },
}

/// What the open session may do with its project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAccess {
    Leased,
    Local,
    ReadOnly { holder: String },
}

//! Edit lease on a project: one editor at a time, renewed by a heartbeat.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::remote::RemoteError;

mod heartbeat;
pub mod manager;

pub use manager::LockManager;

#[derive(Debug, Error)]
pub enum LockError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("lease on project {0} kept changing hands during acquire")]
    Contended(String),
}

/// Lease as seen by one user at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    LockedByMe {
        expires_at: DateTime<Utc>,
    },
    LockedByOther {
        holder: String,
        expires_at: DateTime<Utc>,
    },
}

impl LockState {
    /// An empty holder, a missing expiry and an expiry at or before `now`
    /// all read as unlocked.
    pub fn classify(
        locked_by: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        me: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let (holder, expires_at) = match (locked_by, expires_at) {
            (Some(holder), Some(expires_at)) if !holder.is_empty() && expires_at > now => {
                (holder, expires_at)
            }
            _ => return LockState::Unlocked,
        };

        if holder == me {
            LockState::LockedByMe { expires_at }
        } else {
            LockState::LockedByOther {
                holder: holder.to_string(),
                expires_at,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired {
        expires_at: DateTime<Utc>,
    },
    HeldByOther {
        holder: String,
        expires_at: DateTime<Utc>,
    },
}

/// Published by the heartbeat after every renewal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseHealth {
    /// No heartbeat running.
    Idle,
    Healthy { expires_at: DateTime<Utc> },
    /// Someone else holds the lease now; the heartbeat has stopped.
    Lost,
    /// Renewal errored. The heartbeat keeps trying.
    RenewFailed(String),
}

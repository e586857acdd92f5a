use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::{
    heartbeat::{heartbeat_loop, HeartbeatTask},
    AcquireOutcome, LeaseHealth, LockError, LockState,
};
use crate::{
    config::{LockConfig, MAX_LEASE_SECS},
    remote::{LockCondition, LockWrite, RemoteError, RemoteProjectStore},
};

/// Attempts made before giving up when the lease flips between the
/// conditional write and the follow-up read.
const ACQUIRE_ATTEMPTS: usize = 2;

struct Heartbeat {
    project_id: String,
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Acquires, renews and releases edit leases for one user.
pub struct LockManager<R> {
    remote: Arc<R>,
    user_id: String,
    lease: chrono::Duration,
    heartbeat_every: Duration,
    heartbeat: Mutex<Option<Heartbeat>>,
    health: Arc<watch::Sender<LeaseHealth>>,
}

impl<R: RemoteProjectStore> LockManager<R> {
    pub fn new(remote: Arc<R>, user_id: impl Into<String>, config: &LockConfig) -> Self {
        Self::with_timing(
            remote,
            user_id,
            config.lease(),
            config.heartbeat_interval(),
        )
    }

    pub fn with_timing(
        remote: Arc<R>,
        user_id: impl Into<String>,
        lease: chrono::Duration,
        heartbeat_every: Duration,
    ) -> Self {
        let (health, _) = watch::channel(LeaseHealth::Idle);
        let longest = chrono::Duration::seconds(MAX_LEASE_SECS as i64);
        Self {
            remote,
            user_id: user_id.into(),
            lease: lease.min(longest),
            heartbeat_every,
            heartbeat: Mutex::new(None),
            health: Arc::new(health),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn health(&self) -> watch::Receiver<LeaseHealth> {
        self.health.subscribe()
    }

    /// Take the lease unless someone else holds an unexpired one.
    ///
    /// The write is a single conditional update, so of two concurrent callers
    /// at most one succeeds. The project row is only read back after a refusal,
    /// to report who holds it.
    pub async fn acquire(&self, project_id: &str) -> Result<AcquireOutcome, LockError> {
        for _ in 0..ACQUIRE_ATTEMPTS {
            let now = Utc::now();
            let expires_at = now + self.lease;
            let taken = self
                .remote
                .update_lock_if(
                    project_id,
                    LockCondition::FreeOrHeldBy(self.user_id.clone()),
                    LockWrite::Hold {
                        user_id: self.user_id.clone(),
                        expires_at,
                    },
                    now,
                )
                .await?;

            if taken {
                info!("acquired lease on {project_id} until {expires_at}");
                return Ok(AcquireOutcome::Acquired { expires_at });
            }

            let project = self.remote.fetch(project_id).await?;
            if let LockState::LockedByOther { holder, expires_at } = LockState::classify(
                project.locked_by.as_deref(),
                project.lock_expires_at,
                &self.user_id,
                Utc::now(),
            ) {
                return Ok(AcquireOutcome::HeldByOther { holder, expires_at });
            }
        }

        Err(LockError::Contended(project_id.to_string()))
    }

    /// Extend the lease. `None` when it is no longer ours.
    pub async fn renew(&self, project_id: &str) -> Result<Option<DateTime<Utc>>, LockError> {
        Ok(renew_lease(
            self.remote.as_ref(),
            &self.user_id,
            project_id,
            self.lease,
            Utc::now(),
        )
        .await?)
    }

    /// Clear the lease if we still hold it. Returns whether anything changed.
    pub async fn release(&self, project_id: &str) -> Result<bool, LockError> {
        let released = self
            .remote
            .update_lock_if(
                project_id,
                LockCondition::HeldBy(self.user_id.clone()),
                LockWrite::Clear,
                Utc::now(),
            )
            .await?;
        if released {
            info!("released lease on {project_id}");
        }
        Ok(released)
    }

    pub async fn status(&self, project_id: &str) -> Result<LockState, LockError> {
        let project = self.remote.fetch(project_id).await?;
        Ok(LockState::classify(
            project.locked_by.as_deref(),
            project.lock_expires_at,
            &self.user_id,
            Utc::now(),
        ))
    }

    /// Renew the lease on `project_id` every heartbeat interval until
    /// stopped. Replaces any heartbeat already running.
    pub async fn start_heartbeat(&self, project_id: &str, expires_at: DateTime<Utc>) {
        let mut guard = self.heartbeat.lock().await;
        if let Some(previous) = guard.take() {
            previous.cancel_token.cancel();
            previous.handle.abort();
        }

        self.health
            .send_replace(LeaseHealth::Healthy { expires_at });

        let cancel_token = CancellationToken::new();
        let task = HeartbeatTask {
            remote: self.remote.clone(),
            user_id: self.user_id.clone(),
            project_id: project_id.to_string(),
            lease: self.lease,
            every: self.heartbeat_every,
            health: self.health.clone(),
        };
        let handle = tokio::spawn(heartbeat_loop(task, cancel_token.clone()));

        *guard = Some(Heartbeat {
            project_id: project_id.to_string(),
            handle,
            cancel_token,
        });
    }

    /// Stop the heartbeat, if any. Returns the project it was renewing.
    pub async fn stop_heartbeat(&self) -> Option<String> {
        let heartbeat = self.heartbeat.lock().await.take()?;
        heartbeat.cancel_token.cancel();
        if let Err(err) = heartbeat.handle.await {
            warn!("heartbeat task for {} failed to join: {err}", heartbeat.project_id);
        }
        self.health.send_replace(LeaseHealth::Idle);
        Some(heartbeat.project_id)
    }

    pub async fn heartbeat_project(&self) -> Option<String> {
        self.heartbeat
            .lock()
            .await
            .as_ref()
            .map(|heartbeat| heartbeat.project_id.clone())
    }
}

impl<R> Drop for LockManager<R> {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.cancel_token.cancel();
        }
    }
}

pub(super) async fn renew_lease<R: RemoteProjectStore>(
    remote: &R,
    user_id: &str,
    project_id: &str,
    lease: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, RemoteError> {
    let expires_at = now + lease;
    let renewed = remote
        .update_lock_if(
            project_id,
            LockCondition::HeldBy(user_id.to_string()),
            LockWrite::Hold {
                user_id: user_id.to_string(),
                expires_at,
            },
            now,
        )
        .await?;
    Ok(renewed.then_some(expires_at))
}

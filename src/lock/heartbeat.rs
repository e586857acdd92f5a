use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::watch, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{manager::renew_lease, LeaseHealth};
use crate::remote::RemoteProjectStore;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub(super) struct HeartbeatTask<R> {
    pub remote: Arc<R>,
    pub user_id: String,
    pub project_id: String,
    pub lease: chrono::Duration,
    pub every: Duration,
    pub health: Arc<watch::Sender<LeaseHealth>>,
}

pub(super) async fn heartbeat_loop<R: RemoteProjectStore>(
    task: HeartbeatTask<R>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(task.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; the lease was just taken.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let renewed = renew_lease(
                    task.remote.as_ref(),
                    &task.user_id,
                    &task.project_id,
                    task.lease,
                    Utc::now(),
                )
                .await;

                match renewed {
                    Ok(Some(expires_at)) => {
                        log_debug!("lease on {} renewed until {expires_at}", task.project_id);
                        task.health.send_replace(LeaseHealth::Healthy { expires_at });
                    }
                    Ok(None) => {
                        log_warn!("lease on {} lost to another editor", task.project_id);
                        task.health.send_replace(LeaseHealth::Lost);
                        break;
                    }
                    Err(err) => {
                        log_warn!("lease renewal for {} failed: {err}", task.project_id);
                        task.health.send_replace(LeaseHealth::RenewFailed(err.to_string()));
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("heartbeat for {} stopped", task.project_id);
                break;
            }
        }
    }
}

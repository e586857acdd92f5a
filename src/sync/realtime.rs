use std::sync::Weak;

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::engine::EngineInner;
use crate::{cache::ProjectCache, remote::{ProjectChange, RemoteProjectStore}};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub(super) struct RealtimeHandle {
    pub project_id: String,
    pub handle: JoinHandle<()>,
    pub cancel_token: CancellationToken,
}

/// Feed remote changes of one project into the engine until cancelled, the
/// feed closes, or the project is deleted.
pub(super) async fn realtime_loop<R, C>(
    engine: Weak<EngineInner<R, C>>,
    project_id: String,
    mut changes: broadcast::Receiver<ProjectChange>,
    cancel_token: CancellationToken,
) where
    R: RemoteProjectStore,
    C: ProjectCache,
{
    log_debug!("listening for changes to {project_id}");

    loop {
        tokio::select! {
            received = changes.recv() => {
                let change = match received {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        log_warn!("realtime feed for {project_id} skipped {skipped} changes");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        log_info!("realtime feed for {project_id} closed");
                        break;
                    }
                };

                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if !engine.apply_change(change).await {
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                log_debug!("realtime listener for {project_id} stopped");
                break;
            }
        }
    }
}

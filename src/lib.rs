//! Field-survey core: GPS conditioning, span-weighted point graphs and an
//! offline-first, lease-locked project sync engine.

pub mod cache;
pub mod config;
pub mod db;
pub mod geo;
pub mod graph;
pub mod lock;
pub mod models;
pub mod network;
pub mod remote;
pub mod signal;
pub mod sync;
pub mod utils;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};

use cache::SqliteProjectCache;
use config::ConfigStore;
use db::Database;
use network::NetworkStatus;
use remote::{RemoteProjectStore, SqliteProjectStore};
use signal::Tracker;
use sync::SyncEngine;

const DATABASE_FILE: &str = "spanline.sqlite3";
const CONFIG_FILE: &str = "config.json";

/// Initialise `env_logger`. Safe to call more than once.
pub fn init_logging() {
    utils::logging::init();
}

/// Everything a host application needs for one signed-in user.
pub struct Core<R> {
    pub engine: SyncEngine<R, SqliteProjectCache>,
    pub config: Arc<ConfigStore>,
    pub db: Database,
}

impl<R: RemoteProjectStore> Core<R> {
    /// Fresh tracker for a new tracking session, using the current config.
    pub fn tracker(&self) -> Tracker {
        Tracker::start(&self.config.get()).for_user(self.engine.user_id())
    }
}

/// Open the local database and config under `data_dir`, then load the
/// user's projects through `remote`.
pub async fn start<R: RemoteProjectStore>(
    data_dir: &Path,
    user_id: impl Into<String>,
    remote: Arc<R>,
    network: NetworkStatus,
) -> Result<Core<R>> {
    let db = open_database(data_dir)?;
    start_with_database(data_dir, db, user_id.into(), remote, network).await
}

/// Like [`start`], with the remote store living in the same local database.
pub async fn start_local(
    data_dir: &Path,
    user_id: impl Into<String>,
    network: NetworkStatus,
) -> Result<Core<SqliteProjectStore>> {
    let db = open_database(data_dir)?;
    let remote = Arc::new(SqliteProjectStore::new(db.clone()));
    start_with_database(data_dir, db, user_id.into(), remote, network).await
}

fn open_database(data_dir: &Path) -> Result<Database> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    Database::new(data_dir.join(DATABASE_FILE))
}

async fn start_with_database<R: RemoteProjectStore>(
    data_dir: &Path,
    db: Database,
    user_id: String,
    remote: Arc<R>,
    network: NetworkStatus,
) -> Result<Core<R>> {
    let config = Arc::new(ConfigStore::new(data_dir.join(CONFIG_FILE))?);
    let engine = SyncEngine::new(
        user_id,
        remote,
        SqliteProjectCache::new(db.clone()),
        network,
        &config.get(),
    );

    match engine.load_projects().await {
        Ok(projects) => info!("spanline ready with {} projects", projects.len()),
        Err(err) => warn!("initial project load failed: {err}"),
    }

    Ok(Core { engine, config, db })
}

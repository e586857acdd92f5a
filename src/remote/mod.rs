//! Remote project store: the shared source of truth for projects and leases.
//!
//! The engine talks to the store only through [`RemoteProjectStore`]. The
//! bundled [`SqliteProjectStore`] backs it with the local database so the
//! whole workflow runs without a network service.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{Connection, Point, Project};

pub mod sqlite;

pub use sqlite::SqliteProjectStore;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote store unreachable: {0}")]
    Unreachable(String),

    #[error("project {0} not found")]
    NotFound(String),

    #[error("remote store failure: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for RemoteError {
    fn from(err: anyhow::Error) -> Self {
        RemoteError::Storage(format!("{err:#}"))
    }
}

/// Row change pushed to subscribers of one project id.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectChange {
    Updated(Project),
    Deleted(String),
}

/// Insert payload. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProjectRecord {
    pub owner_id: String,
    pub name: String,
    pub points: Vec<Point>,
    pub connections: Vec<Connection>,
    pub total_distance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewProjectRecord {
    pub fn from_project(project: &Project) -> Self {
        Self {
            owner_id: project.owner_id.clone(),
            name: project.name.clone(),
            points: project.points.clone(),
            connections: project.connections.clone(),
            total_distance: project.total_distance,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

/// Update payload for an existing id. Lease columns are untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectUpdate {
    pub name: String,
    pub points: Vec<Point>,
    pub connections: Vec<Connection>,
    pub total_distance: f64,
    pub updated_at: DateTime<Utc>,
}

impl ProjectUpdate {
    pub fn from_project(project: &Project) -> Self {
        Self {
            name: project.name.clone(),
            points: project.points.clone(),
            connections: project.connections.clone(),
            total_distance: project.total_distance,
            updated_at: project.updated_at,
        }
    }
}

/// Guard of a conditional lease write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCondition {
    /// Unlocked, already held by this user, or lease expired.
    FreeOrHeldBy(String),
    /// Currently held by this user, expired or not.
    HeldBy(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockWrite {
    Hold {
        user_id: String,
        expires_at: DateTime<Utc>,
    },
    Clear,
}

pub trait RemoteProjectStore: Send + Sync + 'static {
    fn select_by_owner(
        &self,
        owner_id: &str,
    ) -> impl Future<Output = Result<Vec<Project>, RemoteError>> + Send;

    fn fetch(&self, project_id: &str)
        -> impl Future<Output = Result<Project, RemoteError>> + Send;

    fn insert(
        &self,
        record: NewProjectRecord,
    ) -> impl Future<Output = Result<Project, RemoteError>> + Send;

    fn update(
        &self,
        project_id: &str,
        update: ProjectUpdate,
    ) -> impl Future<Output = Result<Project, RemoteError>> + Send;

    fn delete(&self, project_id: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Atomic test-and-set on the lease columns. `Ok(false)` when the
    /// condition did not match.
    fn update_lock_if(
        &self,
        project_id: &str,
        condition: LockCondition,
        write: LockWrite,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, RemoteError>> + Send;

    /// Change feed for one project id.
    fn subscribe(&self, project_id: &str) -> Result<broadcast::Receiver<ProjectChange>, RemoteError>;
}

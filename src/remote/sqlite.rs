use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::broadcast;

use super::{
    LockCondition, LockWrite, NewProjectRecord, ProjectChange, ProjectUpdate, RemoteError,
    RemoteProjectStore,
};
use crate::{db::Database, models::Project};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Project store backed by the SQLite database, with an in-process change feed.
///
/// Clones share the database and the subscriber registry, so several engines
/// holding clones behave like clients of one backend.
#[derive(Clone)]
pub struct SqliteProjectStore {
    db: Database,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<ProjectChange>>>>,
    reachable: Arc<AtomicBool>,
}

impl SqliteProjectStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            channels: Arc::new(Mutex::new(HashMap::new())),
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage: every call fails with [`RemoteError::Unreachable`].
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unreachable("store marked unreachable".into()))
        }
    }

    fn publish(&self, project_id: &str, change: ProjectChange) {
        let channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = channels.get(project_id) {
            // No live receivers is fine.
            if sender.send(change).is_err() {
                debug!("no subscribers for project {project_id}");
            }
        }
    }
}

impl RemoteProjectStore for SqliteProjectStore {
    async fn select_by_owner(&self, owner_id: &str) -> Result<Vec<Project>, RemoteError> {
        self.ensure_reachable()?;
        Ok(self.db.list_projects_by_owner(owner_id).await?)
    }

    async fn fetch(&self, project_id: &str) -> Result<Project, RemoteError> {
        self.ensure_reachable()?;
        self.db
            .get_project(project_id)
            .await?
            .ok_or_else(|| RemoteError::NotFound(project_id.to_string()))
    }

    async fn insert(&self, record: NewProjectRecord) -> Result<Project, RemoteError> {
        self.ensure_reachable()?;
        let project = self.db.insert_project(record).await?;
        self.publish(&project.id, ProjectChange::Updated(project.clone()));
        Ok(project)
    }

    async fn update(&self, project_id: &str, update: ProjectUpdate) -> Result<Project, RemoteError> {
        self.ensure_reachable()?;
        let project = self
            .db
            .update_project(project_id, update)
            .await?
            .ok_or_else(|| RemoteError::NotFound(project_id.to_string()))?;
        self.publish(project_id, ProjectChange::Updated(project.clone()));
        Ok(project)
    }

    async fn delete(&self, project_id: &str) -> Result<(), RemoteError> {
        self.ensure_reachable()?;
        if self.db.delete_project(project_id).await? {
            self.publish(project_id, ProjectChange::Deleted(project_id.to_string()));
        }
        Ok(())
    }

    async fn update_lock_if(
        &self,
        project_id: &str,
        condition: LockCondition,
        write: LockWrite,
        now: DateTime<Utc>,
    ) -> Result<bool, RemoteError> {
        self.ensure_reachable()?;
        match self
            .db
            .update_project_lock_if(project_id, condition, write, now)
            .await?
        {
            Some(project) => {
                self.publish(project_id, ProjectChange::Updated(project));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn subscribe(&self, project_id: &str) -> Result<broadcast::Receiver<ProjectChange>, RemoteError> {
        self.ensure_reachable()?;
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let sender = channels
            .entry(project_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteProjectStore {
        SqliteProjectStore::new(Database::in_memory().unwrap())
    }

    fn record(owner: &str) -> NewProjectRecord {
        let now = Utc::now();
        NewProjectRecord {
            owner_id: owner.into(),
            name: "Trench A".into(),
            points: vec![],
            connections: vec![],
            total_distance: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let store = store();
        assert!(matches!(
            store.fetch("missing").await,
            Err(RemoteError::NotFound(id)) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_every_call() {
        let store = store();
        store.set_reachable(false);
        assert!(matches!(
            store.select_by_owner("alice").await,
            Err(RemoteError::Unreachable(_))
        ));
        assert!(store.subscribe("p").is_err());

        store.set_reachable(true);
        assert!(store.select_by_owner("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates_and_deletes() {
        let store = store();
        let project = store.insert(record("alice")).await.unwrap();
        let mut changes = store.subscribe(&project.id).unwrap();

        let mut update = ProjectUpdate::from_project(&project);
        update.name = "Trench B".into();
        store.update(&project.id, update).await.unwrap();
        match changes.recv().await.unwrap() {
            ProjectChange::Updated(p) => assert_eq!(p.name, "Trench B"),
            other => panic!("unexpected change {other:?}"),
        }

        store.delete(&project.id).await.unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            ProjectChange::Deleted(project.id.clone())
        );
    }

    #[tokio::test]
    async fn test_lock_changes_are_published() {
        let store = store();
        let project = store.insert(record("alice")).await.unwrap();
        let mut changes = store.subscribe(&project.id).unwrap();
        let now = Utc::now();

        let acquired = store
            .update_lock_if(
                &project.id,
                LockCondition::FreeOrHeldBy("alice".into()),
                LockWrite::Hold {
                    user_id: "alice".into(),
                    expires_at: now + chrono::Duration::minutes(5),
                },
                now,
            )
            .await
            .unwrap();
        assert!(acquired);

        match changes.recv().await.unwrap() {
            ProjectChange::Updated(p) => assert_eq!(p.locked_by.as_deref(), Some("alice")),
            other => panic!("unexpected change {other:?}"),
        }
    }
}

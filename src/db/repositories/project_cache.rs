use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::{
    helpers::{from_json, to_json},
    Database,
};
use crate::models::Project;

/// Decode the cached list entry by entry, so one broken project does not hide
/// the others.
fn decode_project_list(json: &str) -> Result<Vec<Project>> {
    let entries: Vec<Value> = from_json(json, "projects_json")?;
    let mut projects = Vec::with_capacity(entries.len());
    for entry in &entries {
        match Project::from_stored_value(entry) {
            Some(project) => {
                if let Some(defect) = &project.defect {
                    warn!("cached project {} is not openable: {defect:?}", project.id);
                }
                projects.push(project);
            }
            None => warn!("dropping cached project entry without an id"),
        }
    }
    Ok(projects)
}

impl Database {
    /// Cached project list for a user, `None` when nothing was ever saved.
    pub async fn load_cached_projects(&self, user_id: &str) -> Result<Option<Vec<Project>>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let blob: Option<String> = conn
                .query_row(
                    "SELECT projects_json FROM project_cache WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| format!("failed to read project cache for {user_id}"))?;

            blob.map(|json| decode_project_list(&json)).transpose()
        })
        .await
    }

    /// Replace the whole cached list for a user.
    pub async fn save_cached_projects(&self, user_id: &str, projects: &[Project]) -> Result<()> {
        let user_id = user_id.to_string();
        let projects_json = to_json(projects, "projects")?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO project_cache (user_id, projects_json, saved_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    projects_json = excluded.projects_json,
                    saved_at = excluded.saved_at",
                params![user_id, projects_json, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to write project cache")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{placeholder_id, NewPoint};

    fn project(id: &str, pending_sync: bool) -> Project {
        let now = Utc::now();
        Project {
            id: id.into(),
            owner_id: "alice".into(),
            name: format!("project {id}"),
            points: vec![NewPoint::at(1.0, 2.0).into_point(None, false)],
            connections: vec![],
            total_distance: 0.0,
            locked_by: None,
            lock_expires_at: None,
            created_at: now,
            updated_at: now,
            pending_sync,
            defect: None,
        }
    }

    #[tokio::test]
    async fn test_missing_cache_is_none() {
        let db = Database::in_memory().unwrap();
        assert!(db.load_cached_projects("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_blob() {
        let db = Database::in_memory().unwrap();
        let local = project(&placeholder_id(), false);
        let pending = project("p-1", true);

        db.save_cached_projects("alice", &[project("old", false)])
            .await
            .unwrap();
        db.save_cached_projects("alice", &[local.clone(), pending.clone()])
            .await
            .unwrap();

        let cached = db.load_cached_projects("alice").await.unwrap().unwrap();
        assert_eq!(cached, vec![local, pending]);
        assert!(db.load_cached_projects("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_broken_entry_keeps_the_rest_loadable() {
        let db = Database::in_memory().unwrap();
        let good = project("good", false);
        let mut broken = serde_json::to_value(project("bad", false)).unwrap();
        broken["points"][0]
            .as_object_mut()
            .unwrap()
            .remove("timestamp");
        let blob = serde_json::json!([good, broken, { "name": "anonymous" }]).to_string();

        db.execute(move |conn| {
            conn.execute(
                "INSERT INTO project_cache (user_id, projects_json, saved_at) VALUES ('alice', ?1, '')",
                params![blob],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let cached = db.load_cached_projects("alice").await.unwrap().unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0], good);
        assert_eq!(cached[1].id, "bad");
        assert!(cached[1].validate().is_err());
    }
}

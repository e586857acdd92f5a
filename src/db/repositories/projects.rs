use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{from_optional_epoch_ms, parse_datetime, to_epoch_ms, to_json},
    Database,
};
use crate::models::{Connection as Edge, Point, Project, ProjectDefect};
use crate::remote::{LockCondition, LockWrite, NewProjectRecord, ProjectUpdate};

const PROJECT_COLUMNS: &str = "id, owner_id, name, points_json, connections_json, total_distance,
     locked_by, lock_expires_at_ms, created_at, updated_at";

/// Decode the graph columns of one row. A broken column marks the project
/// instead of failing the query it belongs to.
fn graph_columns(
    points_json: &str,
    connections_json: &str,
) -> (Vec<Point>, Vec<Edge>, Option<ProjectDefect>) {
    let points = match serde_json::from_str::<Option<Vec<Point>>>(points_json) {
        Ok(Some(points)) => points,
        Ok(None) => return (Vec::new(), Vec::new(), Some(ProjectDefect::MissingPoints)),
        Err(err) => {
            let reason = format!("points_json: {err}");
            return (Vec::new(), Vec::new(), Some(ProjectDefect::Undecodable(reason)));
        }
    };
    match serde_json::from_str::<Option<Vec<Edge>>>(connections_json) {
        Ok(connections) => (points, connections.unwrap_or_default(), None),
        Err(err) => {
            let reason = format!("connections_json: {err}");
            (points, Vec::new(), Some(ProjectDefect::Undecodable(reason)))
        }
    }
}

fn row_to_project(row: &Row) -> Result<Project> {
    let points_json: String = row.get("points_json")?;
    let connections_json: String = row.get("connections_json")?;
    let lock_expires_at_ms: Option<i64> = row.get("lock_expires_at_ms")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let (points, connections, defect) = graph_columns(&points_json, &connections_json);

    Ok(Project {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        name: row.get("name")?,
        points,
        connections,
        total_distance: row.get("total_distance")?,
        locked_by: row
            .get::<_, Option<String>>("locked_by")?
            .filter(|holder| !holder.is_empty()),
        lock_expires_at: from_optional_epoch_ms(lock_expires_at_ms, "lock_expires_at_ms")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
        pending_sync: false,
        defect,
    })
}

fn select_project(conn: &Connection, project_id: &str) -> Result<Option<Project>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"
    ))?;
    let mut rows = stmt.query(params![project_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_project(row)?)),
        None => Ok(None),
    }
}

impl Database {
    /// Insert a project under a freshly assigned id and return the stored row.
    pub async fn insert_project(&self, record: NewProjectRecord) -> Result<Project> {
        self.execute(move |conn| {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO projects (id, owner_id, name, points_json, connections_json, total_distance, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    record.owner_id,
                    record.name,
                    to_json(&record.points, "points")?,
                    to_json(&record.connections, "connections")?,
                    record.total_distance,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert project")?;

            select_project(conn, &id)?
                .with_context(|| format!("project {id} missing after insert"))
        })
        .await
    }

    /// Replace name and graph of a project. `None` when the id is unknown.
    pub async fn update_project(
        &self,
        project_id: &str,
        update: ProjectUpdate,
    ) -> Result<Option<Project>> {
        let project_id = project_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE projects
                     SET name = ?1,
                         points_json = ?2,
                         connections_json = ?3,
                         total_distance = ?4,
                         updated_at = ?5
                     WHERE id = ?6",
                    params![
                        update.name,
                        to_json(&update.points, "points")?,
                        to_json(&update.connections, "connections")?,
                        update.total_distance,
                        update.updated_at.to_rfc3339(),
                        project_id,
                    ],
                )
                .with_context(|| "failed to update project")?;

            if rows_affected == 0 {
                return Ok(None);
            }
            select_project(conn, &project_id)
        })
        .await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let project_id = project_id.to_string();
        self.execute(move |conn| select_project(conn, &project_id))
            .await
    }

    pub async fn list_projects_by_owner(&self, owner_id: &str) -> Result<Vec<Project>> {
        let owner_id = owner_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROJECT_COLUMNS}
                 FROM projects
                 WHERE owner_id = ?1
                 ORDER BY updated_at DESC"
            ))?;

            let mut rows = stmt.query(params![owner_id])?;
            let mut projects = Vec::new();
            while let Some(row) = rows.next()? {
                projects.push(row_to_project(row)?);
            }

            Ok(projects)
        })
        .await
    }

    /// Returns whether a row was deleted.
    pub async fn delete_project(&self, project_id: &str) -> Result<bool> {
        let project_id = project_id.to_string();
        self.execute(move |conn| {
            let rows_affected =
                conn.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
            Ok(rows_affected > 0)
        })
        .await
    }

    /// Single conditional UPDATE on the lease columns.
    ///
    /// Returns the updated row when the condition matched, `None` otherwise.
    pub async fn update_project_lock_if(
        &self,
        project_id: &str,
        condition: LockCondition,
        write: LockWrite,
        now: DateTime<Utc>,
    ) -> Result<Option<Project>> {
        let project_id = project_id.to_string();
        self.execute(move |conn| {
            let (locked_by, expires_at_ms) = match &write {
                LockWrite::Hold {
                    user_id,
                    expires_at,
                } => (Some(user_id.clone()), Some(to_epoch_ms(*expires_at))),
                LockWrite::Clear => (None, None),
            };

            let rows_affected = match &condition {
                LockCondition::FreeOrHeldBy(user_id) => conn.execute(
                    "UPDATE projects
                     SET locked_by = ?1,
                         lock_expires_at_ms = ?2
                     WHERE id = ?3
                       AND (locked_by IS NULL
                            OR locked_by = ''
                            OR locked_by = ?4
                            OR lock_expires_at_ms IS NULL
                            OR lock_expires_at_ms <= ?5)",
                    params![
                        locked_by,
                        expires_at_ms,
                        project_id,
                        user_id,
                        to_epoch_ms(now),
                    ],
                )?,
                LockCondition::HeldBy(user_id) => conn.execute(
                    "UPDATE projects
                     SET locked_by = ?1,
                         lock_expires_at_ms = ?2
                     WHERE id = ?3 AND locked_by = ?4",
                    params![locked_by, expires_at_ms, project_id, user_id],
                )?,
            };

            if rows_affected == 0 {
                return Ok(None);
            }
            select_project(conn, &project_id)
        })
        .await
    }
}

//! Project aggregate and the id conventions shared by cache and remote store.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::point::{Connection, Point};

/// Prefix marking a project id that has never been persisted remotely.
pub const LOCAL_ID_PREFIX: &str = "local-";

pub fn placeholder_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", from = "StoredProject")]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub points: Vec<Point>,
    pub connections: Vec<Connection>,
    /// Snapshot of the graph distance taken at save time. Never authoritative.
    pub total_distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Saved locally while offline and not yet pushed. Local cache only.
    #[serde(skip_serializing_if = "is_false")]
    pub pending_sync: bool,
    /// Set when the stored copy could not be loaded as a graph. The entry
    /// stays listed but cannot be opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defect: Option<ProjectDefect>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum ProjectDefect {
    MissingPoints,
    Undecodable(String),
}

/// Decoding shape of [`Project`]. Tells an absent `points` list apart from
/// an empty one.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredProject {
    id: String,
    #[serde(default)]
    owner_id: String,
    name: String,
    #[serde(default)]
    points: Option<Vec<Point>>,
    #[serde(default, deserialize_with = "nullable_vec")]
    connections: Vec<Connection>,
    #[serde(default)]
    total_distance: f64,
    #[serde(default)]
    locked_by: Option<String>,
    #[serde(default)]
    lock_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    pending_sync: bool,
    #[serde(default)]
    defect: Option<ProjectDefect>,
}

impl From<StoredProject> for Project {
    fn from(stored: StoredProject) -> Self {
        let defect = match (&stored.points, stored.defect) {
            (_, Some(defect)) => Some(defect),
            (None, None) => Some(ProjectDefect::MissingPoints),
            (Some(_), None) => None,
        };
        Project {
            id: stored.id,
            owner_id: stored.owner_id,
            name: stored.name,
            points: stored.points.unwrap_or_default(),
            connections: stored.connections,
            total_distance: stored.total_distance,
            locked_by: stored.locked_by,
            lock_expires_at: stored.lock_expires_at,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            pending_sync: stored.pending_sync,
            defect,
        }
    }
}

impl Project {
    /// Decode one entry of a stored project list.
    ///
    /// An entry that fails to decode keeps its id, name and timestamps and
    /// comes back marked [`ProjectDefect::Undecodable`]. `None` only when the
    /// entry has no usable id.
    pub fn from_stored_value(value: &Value) -> Option<Project> {
        let err = match Project::deserialize(value) {
            Ok(project) => return Some(project),
            Err(err) => err,
        };

        let id = match value.get("id")? {
            Value::String(id) if !id.is_empty() => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };
        let updated_at = instant_field(value, "updatedAt")
            .or_else(|| instant_field(value, "createdAt"))
            .unwrap_or_default();

        Some(Project {
            id,
            owner_id: str_field(value, "ownerId").unwrap_or_default().to_string(),
            name: str_field(value, "name").unwrap_or_default().to_string(),
            points: Vec::new(),
            connections: Vec::new(),
            total_distance: 0.0,
            locked_by: None,
            lock_expires_at: None,
            created_at: instant_field(value, "createdAt").unwrap_or(updated_at),
            updated_at,
            pending_sync: false,
            defect: Some(ProjectDefect::Undecodable(err.to_string())),
        })
    }

    pub fn is_placeholder(&self) -> bool {
        is_placeholder_id(&self.id)
    }

    /// Instant used to pick the winner when two copies of one id meet.
    pub fn freshness(&self) -> DateTime<Utc> {
        self.updated_at.max(self.created_at)
    }

    /// Checks that the graph can be loaded into an editing session.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.defect {
            Some(ProjectDefect::MissingPoints) => Err(ValidationError::MissingPoints),
            Some(ProjectDefect::Undecodable(reason)) => {
                Err(ValidationError::Undecodable(reason.clone()))
            }
            None => validate_points(&self.points),
        }
    }
}

/// Fields the caller hands to a save; the engine fills in the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectDraft {
    /// `None` for a brand new project.
    pub id: Option<String>,
    pub name: String,
    pub points: Vec<Point>,
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("point {point_id} has non-numeric or out-of-range coordinates")]
    InvalidCoordinates { point_id: String },

    #[error("point id {0} appears more than once")]
    DuplicatePointId(String),

    #[error("project has no points list")]
    MissingPoints,

    #[error("project could not be decoded: {0}")]
    Undecodable(String),
}

pub fn validate_points(points: &[Point]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(points.len());
    for point in points {
        let lat_ok = point.lat.is_finite() && (-90.0..=90.0).contains(&point.lat);
        let lng_ok = point.lng.is_finite() && (-180.0..=180.0).contains(&point.lng);
        if !lat_ok || !lng_ok {
            return Err(ValidationError::InvalidCoordinates {
                point_id: point.id.clone(),
            });
        }
        if !seen.insert(point.id.as_str()) {
            return Err(ValidationError::DuplicatePointId(point.id.clone()));
        }
    }
    Ok(())
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn instant_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    str_field(value, key)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPoint;
    use serde_json::json;

    fn project_with(points: Vec<Point>) -> Project {
        let now = Utc::now();
        Project {
            id: "p".into(),
            owner_id: "u".into(),
            name: "Main street".into(),
            points,
            connections: vec![],
            total_distance: 0.0,
            locked_by: None,
            lock_expires_at: None,
            created_at: now,
            updated_at: now,
            pending_sync: false,
            defect: None,
        }
    }

    #[test]
    fn test_placeholder_ids() {
        let id = placeholder_id();
        assert!(is_placeholder_id(&id));
        assert!(!is_placeholder_id("3f1c6a9e-0000-4000-8000-000000000000"));
    }

    #[test]
    fn test_validate_accepts_well_formed_points() {
        let points = vec![
            NewPoint::at(10.0, 20.0).into_point(None, false),
            NewPoint::at(-89.9, 179.9).into_point(None, false),
        ];
        assert_eq!(project_with(points).validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_coordinates() {
        let mut point = NewPoint::at(0.0, 0.0).into_point(None, false);
        point.lat = f64::NAN;
        let id = point.id.clone();
        assert_eq!(
            project_with(vec![point]).validate(),
            Err(ValidationError::InvalidCoordinates { point_id: id })
        );

        let far = NewPoint::at(95.0, 0.0).into_point(None, false);
        assert!(project_with(vec![far]).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let a = NewPoint::at(1.0, 1.0).into_point(None, false);
        let mut b = NewPoint::at(1.0, 1.001).into_point(None, false);
        b.id = a.id.clone();
        assert_eq!(
            project_with(vec![a.clone(), b]).validate(),
            Err(ValidationError::DuplicatePointId(a.id))
        );
    }

    #[test]
    fn test_absent_or_null_points_are_refused() {
        for points in [None, Some(Value::Null)] {
            let mut raw = json!({
                "id": "abc",
                "name": "Imported",
                "createdAt": "2024-01-01T00:00:00Z",
                "updatedAt": "2024-01-02T00:00:00Z"
            });
            if let Some(points) = points {
                raw["points"] = points;
            }
            let project: Project = serde_json::from_value(raw).unwrap();
            assert!(project.points.is_empty());
            assert!(project.connections.is_empty());
            assert!(!project.pending_sync);
            assert_eq!(project.defect, Some(ProjectDefect::MissingPoints));
            assert_eq!(project.validate(), Err(ValidationError::MissingPoints));
        }
    }

    #[test]
    fn test_empty_points_list_is_openable() {
        let project: Project = serde_json::from_value(json!({
            "id": "abc",
            "name": "Fresh",
            "points": [],
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(project.validate(), Ok(()));
    }

    #[test]
    fn test_defect_survives_a_cache_round_trip() {
        let mut project = project_with(vec![]);
        project.defect = Some(ProjectDefect::MissingPoints);
        let encoded = serde_json::to_value(&project).unwrap();
        assert_eq!(encoded["defect"]["kind"], "missingPoints");

        let decoded: Project = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, project);
        assert!(serde_json::to_value(project_with(vec![])).unwrap().get("defect").is_none());
    }

    #[test]
    fn test_undecodable_entry_is_kept_with_its_identity() {
        let raw = json!({
            "id": "bad",
            "name": "Half written",
            "points": [{ "id": "x", "lat": 1.0, "lng": 2.0 }],
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-03T00:00:00Z",
            "pendingSync": true
        });
        let project = Project::from_stored_value(&raw).unwrap();
        assert_eq!(project.id, "bad");
        assert_eq!(project.name, "Half written");
        assert_eq!(project.updated_at.to_rfc3339(), "2024-01-03T00:00:00+00:00");
        assert!(!project.pending_sync);
        assert!(matches!(project.validate(), Err(ValidationError::Undecodable(_))));

        assert!(Project::from_stored_value(&json!({ "name": "no id" })).is_none());
        assert_eq!(
            Project::from_stored_value(&json!({ "id": 42 })).map(|p| p.id),
            Some("42".to_string())
        );
    }

    #[test]
    fn test_freshness_prefers_later_timestamp() {
        let mut project = project_with(vec![]);
        project.updated_at = project.created_at - chrono::Duration::seconds(5);
        assert_eq!(project.freshness(), project.created_at);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A located vertex of a survey graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub id: String,
    /// Stored coordinates are decoded leniently: anything that is not a JSON
    /// number becomes NaN so the owning project fails validation instead of
    /// failing to decode.
    #[serde(default = "nan", deserialize_with = "lenient_coordinate")]
    pub lat: f64,
    #[serde(default = "nan", deserialize_with = "lenient_coordinate")]
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Parent vertex. Dangling ids are treated as "no parent".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_from: Option<String>,
    /// Suppresses the sequential fallback edge to the previous point.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_gap: bool,
    #[serde(default = "default_spans", deserialize_with = "lenient_spans")]
    pub spans: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Point {
    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }

    pub fn effective_spans(&self) -> u32 {
        self.spans.max(1)
    }
}

/// Extra edge between two existing points, outside the parent chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(default = "default_spans", deserialize_with = "lenient_spans")]
    pub spans: u32,
}

impl Connection {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, spans: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            spans: spans.max(1),
        }
    }

    pub fn effective_spans(&self) -> u32 {
        self.spans.max(1)
    }

    pub fn touches(&self, point_id: &str) -> bool {
        self.from_id == point_id || self.to_id == point_id
    }
}

/// Input for appending a point; the graph decides id and parent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPoint {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    pub accuracy: Option<f64>,
    pub user_id: Option<String>,
    pub description: Option<String>,
}

impl NewPoint {
    pub fn at(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            timestamp: Utc::now(),
            accuracy: None,
            user_id: None,
            description: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub(crate) fn into_point(self, connected_from: Option<String>, is_gap: bool) -> Point {
        Point {
            id: Uuid::new_v4().to_string(),
            lat: self.lat,
            lng: self.lng,
            timestamp: self.timestamp,
            accuracy: self.accuracy,
            connected_from,
            is_gap,
            spans: 1,
            user_id: self.user_id,
            description: self.description,
        }
    }
}

/// Coerce a raw JSON spans value: integral values >= 1 are kept, everything
/// else (missing, fractional, zero, negative, non-numeric) counts as 1.
pub fn spans_from_value(value: &serde_json::Value) -> u32 {
    if let Some(n) = value.as_u64() {
        return n.clamp(1, u32::MAX as u64) as u32;
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f >= 1.0 => f.min(u32::MAX as f64) as u32,
        _ => 1,
    }
}

fn lenient_spans<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(spans_from_value(&value))
}

fn lenient_coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or(f64::NAN))
}

fn default_spans() -> u32 {
    1
}

fn nan() -> f64 {
    f64::NAN
}

fn is_false(value: &bool) -> bool {
    !*value
}

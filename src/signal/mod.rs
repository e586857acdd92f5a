//! GPS signal conditioning: per-axis smoothing, sample gating and automatic
//! point capture.

pub mod capture;
pub mod filter;
pub mod gate;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use capture::{AutoCapture, CaptureSkip};
pub use filter::NoiseFilter;
pub use gate::{GateDecision, ValidityGate};
pub use tracker::{
    CaptureDecision, FallbackRequest, LocationError, LocationProvider, SampleOutcome, Tracker,
};

/// Raw reading from the location provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    /// Instantaneous speed in m/s, when the device reports one.
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl RawSample {
    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PositionSource {
    Filtered,
    Fallback,
}

/// Position shown to the user as "current location".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub source: PositionSource,
}

impl Position {
    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

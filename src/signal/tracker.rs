use std::{future::Future, time::Duration};

use thiserror::Error;

use super::{
    capture::{AutoCapture, CaptureSkip},
    filter::NoiseFilter,
    gate::{GateDecision, ValidityGate},
    Position, PositionSource, RawSample,
};
use crate::{config::CoreConfig, models::NewPoint};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location unavailable: {0}")]
    Unavailable(String),

    #[error("location request timed out after {0:?}")]
    Timeout(Duration),
}

/// Options for the single-shot fallback read: slower, coarser, cache tolerant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackRequest {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl Default for FallbackRequest {
    fn default() -> Self {
        Self {
            high_accuracy: false,
            timeout: Duration::from_secs(20),
            maximum_age: Duration::from_secs(60),
        }
    }
}

/// Device location source. Streaming samples are pushed into
/// [`Tracker::on_sample`] by the caller; the tracker only pulls the fallback.
pub trait LocationProvider: Send + Sync {
    fn current_position(
        &self,
        request: FallbackRequest,
    ) -> impl Future<Output = Result<RawSample, LocationError>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureDecision {
    Disabled,
    Captured(NewPoint),
    Skipped(CaptureSkip),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Rejected {
        reason: GateDecision,
        /// Last reported accuracy, kept for diagnostic display.
        accuracy_m: Option<f64>,
    },
    Accepted {
        position: Position,
        capture: CaptureDecision,
    },
}

/// Signal conditioning for one tracking session.
///
/// Create a fresh tracker per session so filter state never leaks between
/// sessions.
#[derive(Debug, Clone)]
pub struct Tracker {
    lat_filter: NoiseFilter,
    lng_filter: NoiseFilter,
    gate: ValidityGate,
    capture: AutoCapture,
    capture_enabled: bool,
    user_id: Option<String>,
    position: Option<Position>,
    last_accuracy_m: Option<f64>,
}

impl Tracker {
    pub fn start(config: &CoreConfig) -> Self {
        let signal = &config.signal;
        Self {
            lat_filter: NoiseFilter::new(signal.measurement_noise, signal.process_noise),
            lng_filter: NoiseFilter::new(signal.measurement_noise, signal.process_noise),
            gate: ValidityGate::new(signal),
            capture: AutoCapture::new(&config.capture),
            capture_enabled: config.capture.enabled,
            user_id: None,
            position: None,
            last_accuracy_m: None,
        }
    }

    /// Attribute captured points to `user_id`.
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn set_auto_capture(&mut self, enabled: bool) {
        self.capture_enabled = enabled;
    }

    /// Best known position: the filtered estimate, or the fallback read.
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn last_accuracy(&self) -> Option<f64> {
        self.last_accuracy_m
    }

    pub fn on_sample(&mut self, sample: RawSample) -> SampleOutcome {
        if sample.accuracy.is_some() {
            self.last_accuracy_m = sample.accuracy;
        }

        let decision = self.gate.evaluate(&sample);
        if !decision.is_accept() {
            log_debug!("location sample rejected: {decision:?}");
            return SampleOutcome::Rejected {
                reason: decision,
                accuracy_m: self.last_accuracy_m,
            };
        }

        let position = Position {
            lat: self.lat_filter.filter(sample.lat),
            lng: self.lng_filter.filter(sample.lng),
            accuracy: sample.accuracy,
            timestamp: sample.timestamp,
            source: PositionSource::Filtered,
        };
        self.position = Some(position.clone());
        self.capture.record(&sample);

        let capture = if !self.capture_enabled {
            CaptureDecision::Disabled
        } else {
            match self.capture.evaluate(position.coords(), &sample) {
                Ok(()) => CaptureDecision::Captured(NewPoint {
                    lat: position.lat,
                    lng: position.lng,
                    timestamp: position.timestamp,
                    accuracy: position.accuracy,
                    user_id: self.user_id.clone(),
                    description: None,
                }),
                Err(skip) => {
                    log_debug!("auto capture skipped: {skip:?}");
                    CaptureDecision::Skipped(skip)
                }
            }
        };

        SampleOutcome::Accepted { position, capture }
    }

    /// Handle a provider failure with one coarse read.
    ///
    /// The fallback only refreshes the displayed position; it never reaches
    /// the filter, the gate or automatic capture.
    pub async fn on_provider_error<P: LocationProvider>(
        &mut self,
        provider: &P,
        error: LocationError,
    ) -> Option<Position> {
        log_warn!("location provider error: {error}; trying low-accuracy fallback");

        match provider.current_position(FallbackRequest::default()).await {
            Ok(sample) => {
                if sample.accuracy.is_some() {
                    self.last_accuracy_m = sample.accuracy;
                }
                let position = Position {
                    lat: sample.lat,
                    lng: sample.lng,
                    accuracy: sample.accuracy,
                    timestamp: sample.timestamp,
                    source: PositionSource::Fallback,
                };
                self.position = Some(position.clone());
                Some(position)
            }
            Err(fallback_error) => {
                log_warn!("fallback location read failed: {fallback_error}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STEP: f64 = 0.00001;

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample(lng: f64, secs: i64, accuracy: f64) -> RawSample {
        RawSample {
            lat: 0.0,
            lng,
            accuracy: Some(accuracy),
            speed: Some(1.5),
            timestamp: base() + ChronoDuration::seconds(secs),
        }
    }

    struct StubProvider {
        result: Result<RawSample, LocationError>,
        calls: AtomicUsize,
    }

    impl LocationProvider for StubProvider {
        async fn current_position(
            &self,
            request: FallbackRequest,
        ) -> Result<RawSample, LocationError> {
            assert!(!request.high_accuracy);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[test]
    fn test_rejected_sample_keeps_accuracy_readout() {
        let mut tracker = Tracker::start(&CoreConfig::default());
        let outcome = tracker.on_sample(sample(0.0, 0, 80.0));
        assert!(matches!(
            outcome,
            SampleOutcome::Rejected {
                reason: GateDecision::TooInaccurate { .. },
                accuracy_m: Some(a)
            } if a == 80.0
        ));
        assert!(tracker.position().is_none());
        assert_eq!(tracker.last_accuracy(), Some(80.0));
    }

    #[test]
    fn test_accepted_sample_is_filtered() {
        let mut tracker = Tracker::start(&CoreConfig::default());
        tracker.on_sample(sample(0.0, 0, 5.0));
        let SampleOutcome::Accepted { position, capture } = tracker.on_sample(sample(10.0 * STEP, 1, 5.0))
        else {
            panic!("expected acceptance");
        };

        assert_eq!(capture, CaptureDecision::Disabled);
        assert_eq!(position.source, PositionSource::Filtered);
        // Smoothed towards the new reading but not all the way.
        assert!(position.lng > 0.0 && position.lng < 10.0 * STEP);
    }

    #[test]
    fn test_auto_capture_emits_new_point() {
        let mut config = CoreConfig::default();
        config.capture.enabled = true;
        let mut tracker = Tracker::start(&config).for_user("surveyor-7");

        let mut captured = Vec::new();
        for i in 0..40 {
            if let SampleOutcome::Accepted {
                capture: CaptureDecision::Captured(point),
                ..
            } = tracker.on_sample(sample(i as f64 * 2.0 * STEP, i, 4.0))
            {
                captured.push(point);
            }
        }

        assert!(captured.len() >= 2, "captured {}", captured.len());
        assert!(captured
            .iter()
            .all(|p| p.user_id.as_deref() == Some("surveyor-7")));
        for pair in captured.windows(2) {
            assert!((pair[1].timestamp - pair[0].timestamp).num_seconds() >= 5);
        }
    }

    #[tokio::test]
    async fn test_provider_error_uses_fallback_once() {
        let mut tracker = Tracker::start(&CoreConfig::default());
        let provider = StubProvider {
            result: Ok(RawSample {
                lat: 1.0,
                lng: 2.0,
                accuracy: Some(150.0),
                speed: None,
                timestamp: base(),
            }),
            calls: AtomicUsize::new(0),
        };

        let position = tracker
            .on_provider_error(&provider, LocationError::Timeout(std::time::Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(position.source, PositionSource::Fallback);
        assert_eq!(tracker.last_accuracy(), Some(150.0));

        // The fallback never seeded the gate: the next good sample is the
        // first accepted one and initialises the filter on itself.
        let SampleOutcome::Accepted { position, .. } = tracker.on_sample(sample(0.0, 1, 5.0)) else {
            panic!("expected acceptance");
        };
        assert_eq!(position.lng, 0.0);
    }

    #[tokio::test]
    async fn test_failed_fallback_keeps_previous_position() {
        let mut tracker = Tracker::start(&CoreConfig::default());
        tracker.on_sample(sample(0.0, 0, 5.0));
        let provider = StubProvider {
            result: Err(LocationError::PermissionDenied),
            calls: AtomicUsize::new(0),
        };

        assert!(tracker
            .on_provider_error(&provider, LocationError::Unavailable("gps off".into()))
            .await
            .is_none());
        assert_eq!(tracker.position().unwrap().source, PositionSource::Filtered);
    }
}

use super::RawSample;
use crate::{config::SignalConfig, geo::haversine_m};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Accept,
    /// Reported accuracy is worse than the ceiling.
    TooInaccurate { accuracy_m: f64, ceiling_m: f64 },
    /// Raw position moved less than the minimum since the last accepted sample.
    TooLittleMovement { moved_m: f64 },
}

impl GateDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, GateDecision::Accept)
    }
}

/// Accept/reject gate for raw location samples.
#[derive(Debug, Clone)]
pub struct ValidityGate {
    max_accuracy_m: f64,
    min_movement_m: f64,
    last_accepted: Option<(f64, f64)>,
}

impl ValidityGate {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            max_accuracy_m: config.max_accuracy_m,
            min_movement_m: config.min_movement_m,
            last_accepted: None,
        }
    }

    /// Decide on `sample` and remember it as the reference when accepted.
    pub fn evaluate(&mut self, sample: &RawSample) -> GateDecision {
        if let Some(accuracy_m) = sample.accuracy {
            if accuracy_m > self.max_accuracy_m {
                return GateDecision::TooInaccurate {
                    accuracy_m,
                    ceiling_m: self.max_accuracy_m,
                };
            }
        }

        if let Some(previous) = self.last_accepted {
            let moved_m = haversine_m(previous, sample.coords());
            if moved_m < self.min_movement_m {
                return GateDecision::TooLittleMovement { moved_m };
            }
        }

        self.last_accepted = Some(sample.coords());
        GateDecision::Accept
    }

    pub fn last_accepted(&self) -> Option<(f64, f64)> {
        self.last_accepted
    }
}

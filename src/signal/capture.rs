use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::RawSample;
use crate::{
    config::CaptureConfig,
    geo::{bearing_deg, bearing_difference_deg, haversine_m},
};

const HISTORY_CAPACITY: usize = 10;

/// Why a filtered position was not turned into a graph point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptureSkip {
    TooSoon { elapsed_secs: f64 },
    TooSlow { speed_mps: Option<f64> },
    Unstable { jitter_m: f64 },
    TooClose { distance_m: f64 },
    Turning { bearing_change_deg: f64 },
}

/// Gate deciding whether an accepted, filtered position becomes a new point.
#[derive(Debug, Clone)]
pub struct AutoCapture {
    config: CaptureConfig,
    /// Never smaller than the configured window.
    capacity: usize,
    history: VecDeque<RawSample>,
    last_capture: Option<((f64, f64), DateTime<Utc>)>,
}

impl AutoCapture {
    pub fn new(config: &CaptureConfig) -> Self {
        let capacity = HISTORY_CAPACITY.max(config.history_window);
        Self {
            config: config.clone(),
            capacity,
            history: VecDeque::with_capacity(capacity),
            last_capture: None,
        }
    }

    /// Append an accepted raw sample to the short history window.
    pub fn record(&mut self, sample: &RawSample) {
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample.clone());
    }

    /// Run every capture check against `filtered`; on success the position
    /// becomes the new "last captured" reference.
    pub fn evaluate(
        &mut self,
        filtered: (f64, f64),
        sample: &RawSample,
    ) -> Result<(), CaptureSkip> {
        let last_capture = self.last_capture;

        if let Some((_, captured_at)) = last_capture {
            let elapsed_secs = (sample.timestamp - captured_at).num_milliseconds() as f64 / 1000.0;
            if elapsed_secs < self.config.min_interval_secs as f64 {
                return Err(CaptureSkip::TooSoon { elapsed_secs });
            }
        }

        let speed_mps = sample.speed.or_else(|| self.derived_speed());
        if !speed_mps.is_some_and(|speed| speed >= self.config.min_speed_mps) {
            return Err(CaptureSkip::TooSlow { speed_mps });
        }

        let window = self.window();

        if let Some(jitter_m) = average_pairwise_distance(&window) {
            if jitter_m > self.config.max_jitter_m {
                return Err(CaptureSkip::Unstable { jitter_m });
            }
        }

        if let Some((captured, _)) = last_capture {
            let distance_m = haversine_m(captured, filtered);
            if distance_m < self.config.min_distance_m {
                return Err(CaptureSkip::TooClose { distance_m });
            }
        }

        if let [.., first, second, third] = window[..] {
            let before = bearing_deg(first, second);
            let after = bearing_deg(second, third);
            let bearing_change_deg = bearing_difference_deg(before, after);
            if bearing_change_deg > self.config.max_bearing_change_deg {
                return Err(CaptureSkip::Turning { bearing_change_deg });
            }
        }

        self.last_capture = Some((filtered, sample.timestamp));
        Ok(())
    }

    /// Coordinates of the most recent `history_window` entries, oldest first.
    /// Empty while the window is not yet full.
    fn window(&self) -> Vec<(f64, f64)> {
        let size = self.config.history_window.max(2);
        if self.history.len() < size {
            return Vec::new();
        }
        self.history
            .iter()
            .skip(self.history.len() - size)
            .map(RawSample::coords)
            .collect()
    }

    fn derived_speed(&self) -> Option<f64> {
        let mut recent = self.history.iter().rev();
        let (latest, previous) = (recent.next()?, recent.next()?);
        let secs = (latest.timestamp - previous.timestamp).num_milliseconds() as f64 / 1000.0;
        if secs <= 0.0 {
            return None;
        }
        Some(haversine_m(previous.coords(), latest.coords()) / secs)
    }
}

fn average_pairwise_distance(coords: &[(f64, f64)]) -> Option<f64> {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in coords.iter().enumerate() {
        for b in &coords[i + 1..] {
            total += haversine_m(*a, *b);
            pairs += 1;
        }
    }
    (pairs > 0).then(|| total / pairs as f64)
}

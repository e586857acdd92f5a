/// One-dimensional Kalman filter applied independently to each coordinate axis.
///
/// The model is `x' = A·x + B·u` observed through `z = C·x`. Callers that only
/// smooth positions use the identity model (`A = 1`, `B = 0`, `C = 1`).
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    /// Measurement noise (R).
    r: f64,
    /// Process noise (Q).
    q: f64,
    a: f64,
    b: f64,
    c: f64,
    x: Option<f64>,
    cov: f64,
}

impl NoiseFilter {
    pub fn new(measurement_noise: f64, process_noise: f64) -> Self {
        Self {
            r: measurement_noise,
            q: process_noise,
            a: 1.0,
            b: 0.0,
            c: 1.0,
            x: None,
            cov: f64::NAN,
        }
    }

    /// Override the state, control and measurement factors.
    pub fn with_model(mut self, state: f64, control: f64, measurement: f64) -> Self {
        self.a = state;
        self.b = control;
        self.c = measurement;
        self
    }

    pub fn filter(&mut self, z: f64) -> f64 {
        self.filter_with_control(z, 0.0)
    }

    pub fn filter_with_control(&mut self, z: f64, u: f64) -> f64 {
        let (a, b, c) = (self.a, self.b, self.c);

        let Some(x) = self.x else {
            let x = z / c;
            self.x = Some(x);
            self.cov = self.q / (c * c);
            return x;
        };

        let pred_x = a * x + b * u;
        let pred_cov = a * self.cov * a + self.q;

        let gain = pred_cov * c / (c * pred_cov * c + self.r);
        let next = pred_x + gain * (z - c * pred_x);

        self.x = Some(next);
        self.cov = pred_cov - gain * c * pred_cov;
        next
    }

    pub fn estimate(&self) -> Option<f64> {
        self.x
    }

    pub fn covariance(&self) -> f64 {
        self.cov
    }

    pub fn reset(&mut self) {
        self.x = None;
        self.cov = f64::NAN;
    }
}

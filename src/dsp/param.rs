//! Click-free parameter smoothing.

/// Default smoothing time constant in seconds.
pub const DEFAULT_TIME_CONSTANT: f64 = 0.15;

/// A parameter that approaches its target exponentially, one sample at a time.
///
/// After `time_constant` seconds the remaining distance to the target has
/// shrunk to 1/e, matching a first-order "set target" curve.
#[derive(Debug, Clone)]
pub struct SmoothedParam {
    value: f32,
    target: f32,
    /// Per-sample approach coefficient.
    coeff: f32,
}

impl SmoothedParam {
    pub fn new(value: f32, sample_rate: f64, time_constant: f64) -> Self {
        SmoothedParam {
            value,
            target: value,
            coeff: approach_coefficient(sample_rate, time_constant),
        }
    }

    /// Move toward `target`, stepping immediately when `instant` is set.
    pub fn set(&mut self, target: f32, instant: bool) {
        self.target = target;
        if instant {
            self.value = target;
        }
    }

    /// Advance one sample and return the new value.
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.value != self.target {
            self.value += (self.target - self.value) * self.coeff;
            if (self.target - self.value).abs() < 1e-6 {
                self.value = self.target;
            }
        }
        self.value
    }

    /// Advance `samples` steps at once.
    pub fn skip(&mut self, samples: usize) -> f32 {
        if self.value != self.target && samples > 0 {
            let remaining = (1.0 - self.coeff).powi(samples as i32);
            self.value = self.target + (self.value - self.target) * remaining;
            if (self.target - self.value).abs() < 1e-6 {
                self.value = self.target;
            }
        }
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn target(&self) -> f32 {
        self.target
    }
}

fn approach_coefficient(sample_rate: f64, time_constant: f64) -> f32 {
    if time_constant <= 0.0 || sample_rate <= 0.0 {
        return 1.0;
    }
    (1.0 - (-1.0 / (time_constant * sample_rate)).exp()) as f32
}

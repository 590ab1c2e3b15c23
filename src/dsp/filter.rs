//! Biquad filter — WebAudio BiquadFilterNode coefficients.

use std::f64::consts::PI;

/// Filter type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterType {
    Lowpass,
    Bandpass,
    /// Boosts or cuts below `frequency` by `gain_db`.
    Lowshelf,
    /// Boosts or cuts above `frequency` by `gain_db`.
    Highshelf,
}

/// A biquad IIR filter (2nd order).
///
/// Implements the standard Direct Form II Transposed structure.
/// Coefficient formulas from the Audio EQ Cookbook (Robert Bristow-Johnson).
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    pub filter_type: FilterType,
    pub frequency: f64,
    pub q: f64,
    pub gain_db: f64, // only used for shelves

    // Coefficients
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    // State (Direct Form II Transposed)
    z1: f64,
    z2: f64,

    sample_rate: f64,
    dirty: bool,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, sample_rate: f64) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency: 1000.0,
            q: 1.0,
            gain_db: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
            dirty: true,
        };
        f.update_coefficients();
        f
    }

    /// Create a filter with frequency and Q already applied.
    pub fn with_params(filter_type: FilterType, sample_rate: f64, frequency: f64, q: f64) -> Self {
        let mut f = Self::new(filter_type, sample_rate);
        f.frequency = frequency;
        f.q = q;
        f.update_coefficients();
        f
    }

    /// Recompute filter coefficients from current parameters.
    pub fn update_coefficients(&mut self) {
        let nyquist = self.sample_rate / 2.0;
        let freq = self.frequency.clamp(1.0, nyquist * 0.999);
        let w0 = 2.0 * PI * freq / self.sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * self.q.max(1e-4));

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            FilterType::Lowpass => {
                let b1 = 1.0 - cos_w0;
                let b0 = b1 / 2.0;
                let b2 = b0;
                let a0 = 1.0 + alpha;
                let a1 = -2.0 * cos_w0;
                let a2 = 1.0 - alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Bandpass => {
                let b0 = alpha;
                let b1 = 0.0;
                let b2 = -alpha;
                let a0 = 1.0 + alpha;
                let a1 = -2.0 * cos_w0;
                let a2 = 1.0 - alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Lowshelf => {
                let a = (10.0_f64).powf(self.gain_db / 40.0);
                // Shelf slope S = 1.
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * (sin_w0 / 2.0 * 2.0_f64.sqrt());
                let b0 = a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha);
                let b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0);
                let b2 = a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha);
                let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
                let a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0);
                let a2 = (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Highshelf => {
                let a = (10.0_f64).powf(self.gain_db / 40.0);
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * (sin_w0 / 2.0 * 2.0_f64.sqrt());
                let b0 = a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha);
                let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0);
                let b2 = a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha);
                let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
                let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_w0);
                let a2 = (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha;
                (b0, b1, b2, a0, a1, a2)
            }
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
        self.dirty = false;
    }

    /// Process a single sample through the filter.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        if self.dirty {
            self.update_coefficients();
        }

        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    /// Reset filter state.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    /// Set frequency and mark coefficients dirty if it moved.
    pub fn set_frequency(&mut self, freq: f64) {
        if freq != self.frequency {
            self.frequency = freq;
            self.dirty = true;
        }
    }

    /// Set Q and mark coefficients dirty if it moved.
    pub fn set_q(&mut self, q: f64) {
        if q != self.q {
            self.q = q;
            self.dirty = true;
        }
    }

    /// Set shelf gain and mark coefficients dirty if it moved.
    pub fn set_gain_db(&mut self, gain_db: f64) {
        if gain_db != self.gain_db {
            self.gain_db = gain_db;
            self.dirty = true;
        }
    }
}

//! Low-frequency oscillator for the pulse and auto-pan stages.
//!
//! At sub-audio rates aliasing is irrelevant, so the shapes are computed
//! directly from the phase without band-limiting.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Supported LFO shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Triangle,
    Square,
}

/// A bipolar [-1, 1] low-frequency oscillator.
#[derive(Debug, Clone)]
pub struct Lfo {
    pub waveform: Waveform,
    pub frequency: f64,
    phase: f64,
    sample_rate: f64,
}

impl Lfo {
    pub fn new(waveform: Waveform, frequency: f64, sample_rate: f64) -> Self {
        Lfo {
            waveform,
            frequency,
            phase: 0.0,
            sample_rate,
        }
    }

    /// Generate the next sample.
    #[inline]
    pub fn next_sample(&mut self) -> f64 {
        let value = match self.waveform {
            Waveform::Sine => (2.0 * PI * self.phase).sin(),
            // Starts at 0 rising, like a sine.
            Waveform::Triangle => {
                if self.phase < 0.25 {
                    4.0 * self.phase
                } else if self.phase < 0.75 {
                    2.0 - 4.0 * self.phase
                } else {
                    4.0 * self.phase - 4.0
                }
            }
            Waveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        };

        self.phase += self.frequency.max(0.0) / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }

        value
    }

    /// Reset oscillator phase.
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

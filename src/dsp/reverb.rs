//! Reverb effect — multi-tap delay network with a damped feedback loop.
//!
//! Six parallel delay taps at mutually prime-ish lengths are summed, darkened
//! by a low-pass filter, and the filtered sum is fed back into the first tap.

use serde::{Deserialize, Serialize};

use super::delay::DelayLine;
use super::filter::{BiquadFilter, FilterType};

const TAP_TIMES: [f64; 6] = [0.029, 0.037, 0.043, 0.053, 0.067, 0.079];
const TAP_GAIN: f32 = 0.4;
const MAX_TAP_DELAY: f64 = 0.1;

/// Room size presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReverbSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl ReverbSize {
    /// Loop feedback gain for this size.
    pub fn feedback(self) -> f32 {
        match self {
            ReverbSize::Small => 0.2,
            ReverbSize::Medium => 0.35,
            ReverbSize::Large => 0.5,
        }
    }

    /// Damping low-pass cutoff in Hz for this size.
    pub fn damping_frequency(self) -> f64 {
        match self {
            ReverbSize::Small => 6000.0,
            ReverbSize::Medium => 4000.0,
            ReverbSize::Large => 2500.0,
        }
    }
}

#[derive(Debug, Clone)]
struct ReverbChannel {
    taps: Vec<DelayLine>,
    damping: BiquadFilter,
    /// Filtered output from the previous sample, fed into the first tap.
    loop_sample: f32,
}

impl ReverbChannel {
    fn new(sample_rate: f64) -> Self {
        ReverbChannel {
            taps: TAP_TIMES
                .iter()
                .map(|&t| DelayLine::new(sample_rate, MAX_TAP_DELAY, t))
                .collect(),
            damping: BiquadFilter::with_params(
                FilterType::Lowpass,
                sample_rate,
                ReverbSize::Medium.damping_frequency(),
                0.707,
            ),
            loop_sample: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32) -> f32 {
        let mut sum = 0.0f32;
        for (i, tap) in self.taps.iter_mut().enumerate() {
            let tap_in = if i == 0 {
                input + self.loop_sample * feedback
            } else {
                input
            };
            sum += tap.process(tap_in) * TAP_GAIN;
        }
        let wet = self.damping.process(sum as f64) as f32;
        self.loop_sample = wet;
        wet
    }
}

/// Stereo reverb producing only the wet signal.
#[derive(Debug, Clone)]
pub struct Reverb {
    left: ReverbChannel,
    right: ReverbChannel,
    /// Loop feedback gain.
    pub feedback: f32,
}

impl Reverb {
    pub fn new(sample_rate: f64) -> Self {
        Reverb {
            left: ReverbChannel::new(sample_rate),
            right: ReverbChannel::new(sample_rate),
            feedback: ReverbSize::Medium.feedback(),
        }
    }

    /// Move the damping cutoff.
    pub fn set_damping_frequency(&mut self, freq: f64) {
        self.left.damping.set_frequency(freq);
        self.right.damping.set_frequency(freq);
    }

    /// Process a stereo sample pair, returning the wet output.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let feedback = self.feedback.clamp(0.0, 0.95);
        (
            self.left.process(left, feedback),
            self.right.process(right, feedback),
        )
    }
}

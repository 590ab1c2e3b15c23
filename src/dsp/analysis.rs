//! Analysis tap: a rolling window of the output for visualizers.

use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Frames kept by the tap (FFT size).
pub const ANALYSIS_SIZE: usize = 256;

/// Floor for spectrum magnitudes, in dB.
const MIN_DB: f32 = -120.0;

/// Keeps the last [`ANALYSIS_SIZE`] mono samples and derives waveform, level
/// and spectrum views on demand.
#[derive(Clone)]
pub struct Analyser {
    ring: Vec<f32>,
    write_pos: usize,
    /// Hann window coefficients.
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl fmt::Debug for Analyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyser")
            .field("size", &self.ring.len())
            .field("write_pos", &self.write_pos)
            .finish()
    }
}

impl Default for Analyser {
    fn default() -> Self {
        Analyser::new()
    }
}

impl Analyser {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(ANALYSIS_SIZE);
        let denom = (ANALYSIS_SIZE - 1) as f32;
        let window = (0..ANALYSIS_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / denom).cos()))
            .collect();
        Analyser {
            ring: vec![0.0; ANALYSIS_SIZE],
            write_pos: 0,
            window,
            fft,
            scratch: vec![Complex::new(0.0, 0.0); ANALYSIS_SIZE],
        }
    }

    /// Record one stereo frame (downmixed to mono).
    #[inline]
    pub fn push(&mut self, left: f32, right: f32) {
        self.ring[self.write_pos] = 0.5 * (left + right);
        self.write_pos = (self.write_pos + 1) % ANALYSIS_SIZE;
    }

    /// The window in time order, oldest first.
    pub fn waveform(&self) -> Vec<f32> {
        let (newer, older) = self.ring.split_at(self.write_pos);
        older.iter().chain(newer).copied().collect()
    }

    /// Root-mean-square level of the window.
    pub fn rms(&self) -> f32 {
        let sum: f32 = self.ring.iter().map(|s| s * s).sum();
        (sum / ANALYSIS_SIZE as f32).sqrt()
    }

    /// Magnitude spectrum in dB for bins `0..ANALYSIS_SIZE / 2`.
    pub fn spectrum(&mut self) -> Vec<f32> {
        let samples = self.waveform();
        for ((slot, s), w) in self.scratch.iter_mut().zip(&samples).zip(&self.window) {
            *slot = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let norm = 2.0 / ANALYSIS_SIZE as f32;
        self.scratch[..ANALYSIS_SIZE / 2]
            .iter()
            .map(|c| {
                let mag = c.norm() * norm;
                if mag > 0.0 {
                    (20.0 * mag.log10()).max(MIN_DB)
                } else {
                    MIN_DB
                }
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.ring.fill(0.0);
        self.write_pos = 0;
    }
}

//! Colored noise kernel.
//!
//! Derives violet, blue, pink and brown noise from a single white draw per
//! tick, then blends them along a continuous color axis:
//! 0 = violet, 1 = blue, 2 = white, 3 = pink, 4 = brown.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Number of output channels a kernel renders.
pub const CHANNELS: usize = 2;

/// Pink noise pole/weight pairs for taps b0..b5 (Paul Kellett's refined method).
const PINK_TAPS: [(f32, f32); 6] = [
    (0.99886, 0.0555179),
    (0.99332, 0.0750759),
    (0.96900, 0.1538520),
    (0.86650, 0.3104856),
    (0.55000, 0.5329522),
    (-0.7616, -0.0168981),
];
const PINK_B6_WEIGHT: f32 = 0.115926;
const PINK_WHITE_WEIGHT: f32 = 0.5362;
const PINK_GAIN: f32 = 0.11;

const BROWN_STEP: f32 = 0.02;
const BROWN_LEAK: f32 = 1.02;
const BROWN_GAIN: f32 = 3.5;

/// Per-sample kernel inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    /// Primary color [0, 4].
    pub color: f32,
    /// Secondary color [0, 4], cross-faded in by `color_blend`.
    pub secondary_color: f32,
    /// Cross-fade amount toward `secondary_color` [0, 1].
    pub color_blend: f32,
    /// < 0.5 selects the Gaussian white source, >= 0.5 the uniform one.
    pub texture: f32,
    /// Quantization depth in bits [2, 16]. 16 disables quantization.
    pub bit_depth: u32,
    /// Sample-and-hold factor [1, 32]. 1 disables the hold.
    pub sample_rate_reduction: u32,
}

impl Default for KernelParams {
    fn default() -> Self {
        KernelParams {
            color: 3.0,
            secondary_color: 3.0,
            color_blend: 0.0,
            texture: 0.0,
            bit_depth: 16,
            sample_rate_reduction: 1,
        }
    }
}

impl KernelParams {
    /// Clamp every field into its documented range.
    pub fn clamped(self) -> Self {
        KernelParams {
            color: self.color.clamp(0.0, 4.0),
            secondary_color: self.secondary_color.clamp(0.0, 4.0),
            color_blend: self.color_blend.clamp(0.0, 1.0),
            texture: self.texture.clamp(0.0, 1.0),
            bit_depth: self.bit_depth.clamp(2, 16),
            sample_rate_reduction: self.sample_rate_reduction.clamp(1, 32),
        }
    }
}

/// The four filtered colors plus the white source they were derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalColors {
    pub violet: f32,
    pub blue: f32,
    pub white: f32,
    pub pink: f32,
    pub brown: f32,
}

impl CanonicalColors {
    /// Piecewise-linear blend for a color in [0, 4].
    pub fn at(&self, color: f32) -> f32 {
        let color = color.clamp(0.0, 4.0);
        let (from, to) = match color {
            c if c < 1.0 => (self.violet, self.blue),
            c if c < 2.0 => (self.blue, self.white),
            c if c < 3.0 => (self.white, self.pink),
            c if c < 4.0 => (self.pink, self.brown),
            _ => return self.brown,
        };
        let t = color - color.floor();
        (1.0 - t) * from + t * to
    }
}

/// Persistent filter state for one output channel.
#[derive(Debug, Clone, Default)]
pub struct NoiseChannelState {
    /// Pink taps b0..b6.
    pink: [f32; 7],
    /// Unclamped brown integrator.
    brown: f32,
    last_white: f32,
    last_blue: f32,
    hold_counter: u32,
    held: f32,
}

impl NoiseChannelState {
    /// Run the color filters on one white sample.
    fn colors(&mut self, white: f32) -> CanonicalColors {
        let violet = (white - self.last_white) * 0.5;
        self.last_white = white;

        let blue = (violet + self.last_blue) * 0.5;
        self.last_blue = blue;

        for (tap, &(leak, weight)) in self.pink.iter_mut().zip(PINK_TAPS.iter()) {
            *tap = leak * *tap + white * weight;
        }
        let pink = (self.pink.iter().sum::<f32>() + white * PINK_WHITE_WEIGHT) * PINK_GAIN;
        // b6 is only read on the next tick.
        self.pink[6] = white * PINK_B6_WEIGHT;

        let integrated = (self.brown + BROWN_STEP * white) / BROWN_LEAK;
        self.brown = integrated;
        let brown = (integrated * BROWN_GAIN).clamp(-1.0, 1.0);

        CanonicalColors {
            violet,
            blue,
            white,
            pink,
            brown,
        }
    }

    /// Sample-and-hold stage. Returns the value to output this tick.
    fn hold(&mut self, sample: f32, factor: u32) -> f32 {
        if factor <= 1 {
            return sample;
        }
        self.hold_counter += 1;
        if self.hold_counter >= factor {
            self.hold_counter = 0;
            self.held = sample;
        }
        self.held
    }
}

/// Multi-channel colored noise generator.
#[derive(Debug, Clone)]
pub struct NoiseKernel {
    channels: [NoiseChannelState; CHANNELS],
    rng: StdRng,
}

impl NoiseKernel {
    /// Kernel seeded from OS entropy.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Kernel with a reproducible random sequence.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        NoiseKernel {
            channels: Default::default(),
            rng,
        }
    }

    fn white(&mut self, texture: f32) -> f32 {
        if texture < 0.5 {
            // Central limit approximation of a Gaussian.
            let sum: f32 = (0..4).map(|_| self.rng.r#gen::<f32>()).sum();
            (sum - 2.0) * 0.75
        } else {
            self.rng.r#gen::<f32>() * 2.0 - 1.0
        }
    }

    /// Produce one sample for `channel`. Callers clamp `params` beforehand.
    #[inline]
    pub fn next_sample(&mut self, channel: usize, params: &KernelParams) -> f32 {
        let white = self.white(params.texture);
        let state = &mut self.channels[channel];
        let colors = state.colors(white);

        let primary = colors.at(params.color);
        let secondary = colors.at(params.secondary_color);
        let mut sample = (1.0 - params.color_blend) * primary + params.color_blend * secondary;

        if params.bit_depth < 16 {
            let steps = (1u32 << (params.bit_depth - 1)) as f32;
            sample = (sample * steps).round() / steps;
        }

        state.hold(sample, params.sample_rate_reduction)
    }

    /// Produce one sample for every channel.
    #[inline]
    pub fn next_frame(&mut self, params: &KernelParams) -> [f32; CHANNELS] {
        let mut frame = [0.0; CHANNELS];
        for (ch, out) in frame.iter_mut().enumerate() {
            *out = self.next_sample(ch, params);
        }
        frame
    }
}

impl Default for NoiseKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(color: f32) -> KernelParams {
        KernelParams {
            color,
            ..KernelParams::default()
        }
    }

    /// Lag-1 autocorrelation: positive for low-tilted noise, negative for high-tilted.
    fn lag1(samples: &[f32]) -> f64 {
        let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64;
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..samples.len() {
            let d = samples[i] as f64 - mean;
            den += d * d;
            if i > 0 {
                num += d * (samples[i - 1] as f64 - mean);
            }
        }
        num / den
    }

    fn render(color: f32, n: usize) -> Vec<f32> {
        let mut kernel = NoiseKernel::with_seed(7);
        let p = params(color);
        (0..n).map(|_| kernel.next_sample(0, &p)).collect()
    }

    #[test]
    fn canonical_blend_endpoints() {
        let colors = CanonicalColors {
            violet: -1.0,
            blue: -0.5,
            white: 0.0,
            pink: 0.5,
            brown: 1.0,
        };
        assert_eq!(colors.at(0.0), -1.0);
        assert_eq!(colors.at(1.0), -0.5);
        assert_eq!(colors.at(2.0), 0.0);
        assert_eq!(colors.at(3.0), 0.5);
        assert_eq!(colors.at(4.0), 1.0);
        assert!((colors.at(3.5) - 0.75).abs() < 1e-6);
        assert!((colors.at(0.25) - -0.875).abs() < 1e-6);
    }

    #[test]
    fn spectral_tilt_increases_with_color() {
        let tilts: Vec<f64> = [0.0, 1.0, 2.0, 3.0, 4.0]
            .iter()
            .map(|&c| lag1(&render(c, 40_000)))
            .collect();
        for pair in tilts.windows(2) {
            assert!(
                pair[0] < pair[1],
                "Lag-1 correlation should rise from violet to brown, got {tilts:?}"
            );
        }
        assert!(tilts[0] < -0.3, "Violet should be strongly anti-correlated");
        assert!(tilts[2].abs() < 0.05, "White should be uncorrelated");
        assert!(tilts[4] > 0.9, "Brown should be strongly correlated");
    }

    #[test]
    fn sweep_between_boundaries_is_monotonic() {
        let tilts: Vec<f64> = (0..=16)
            .map(|i| lag1(&render(i as f32 * 0.25, 20_000)))
            .collect();
        for (i, pair) in tilts.windows(2).enumerate() {
            assert!(
                pair[1] > pair[0] - 0.03,
                "Tilt should not fall between color {} and {}: {tilts:?}",
                i as f32 * 0.25,
                (i + 1) as f32 * 0.25
            );
        }
    }

    #[test]
    fn bit_depth_quantizes_to_grid() {
        let mut kernel = NoiseKernel::with_seed(3);
        let p = KernelParams {
            color: 2.0,
            bit_depth: 8,
            ..KernelParams::default()
        };
        for _ in 0..5_000 {
            let s = kernel.next_sample(0, &p);
            let k = s * 128.0;
            assert!((k - k.round()).abs() < 1e-4, "Sample {s} not on the 1/128 grid");
            assert!(s.abs() <= 1.5, "Quantized sample out of range: {s}");
        }
    }

    #[test]
    fn uniform_white_quantizes_inside_unit_range() {
        let mut kernel = NoiseKernel::with_seed(5);
        let p = KernelParams {
            color: 2.0,
            texture: 1.0,
            bit_depth: 8,
            ..KernelParams::default()
        };
        for _ in 0..5_000 {
            let s = kernel.next_sample(0, &p);
            let k = s * 128.0;
            assert_eq!(k, k.round(), "Sample {s} not on the 1/128 grid");
            assert!((-1.0..=1.0).contains(&s), "Quantized sample outside [-1, 1]: {s}");
        }
    }

    #[test]
    fn sample_and_hold_repeats_values() {
        let mut kernel = NoiseKernel::with_seed(11);
        let p = KernelParams {
            color: 2.0,
            sample_rate_reduction: 4,
            ..KernelParams::default()
        };
        let out: Vec<f32> = (0..400).map(|_| kernel.next_sample(0, &p)).collect();
        // First latch happens on the fourth tick; after that values change at most every 4 ticks.
        for chunk in out[3..].chunks(4).filter(|c| c.len() == 4) {
            assert!(chunk.iter().all(|&s| s == chunk[0]), "Hold broken: {chunk:?}");
        }
    }

    #[test]
    fn channels_keep_independent_state() {
        let mut kernel = NoiseKernel::with_seed(5);
        let p = params(4.0);
        for _ in 0..1000 {
            kernel.next_frame(&p);
        }
        let [l, r] = kernel.next_frame(&p);
        assert_ne!(l, r, "Brown channels should wander independently");
    }

    #[test]
    fn blend_crossfades_colors() {
        let mut a = NoiseKernel::with_seed(9);
        let mut b = NoiseKernel::with_seed(9);
        let pure_brown = params(4.0);
        let blended_to_brown = KernelParams {
            color: 0.0,
            secondary_color: 4.0,
            color_blend: 1.0,
            ..KernelParams::default()
        };
        for _ in 0..256 {
            assert_eq!(
                a.next_sample(0, &pure_brown),
                b.next_sample(0, &blended_to_brown)
            );
        }
    }

    #[test]
    fn seeded_kernels_are_reproducible() {
        assert_eq!(render(3.0, 512), render(3.0, 512));
    }
}

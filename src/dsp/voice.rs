//! Voice chain: noise kernel, envelope, volume and pan for one source.
//!
//! The same chain backs an interactive voice and a single note of an offline
//! composition render, so both paths shape the noise identically.

use super::envelope::Envelope;
use super::mixer::pan_stereo;
use super::noise::{KernelParams, NoiseKernel};
use super::param::SmoothedParam;

/// One noise source shaped by an envelope and placed in the stereo field.
#[derive(Debug, Clone)]
pub struct VoiceChain {
    kernel: NoiseKernel,
    pub envelope: Envelope,
    volume: SmoothedParam,
    pan: SmoothedParam,
    color: SmoothedParam,
    params: KernelParams,
}

impl VoiceChain {
    /// A silent chain. `seed` fixes the noise stream; `None` draws from entropy.
    pub fn new(sample_rate: f64, time_constant: f64, seed: Option<u64>) -> Self {
        let params = KernelParams::default();
        VoiceChain {
            kernel: match seed {
                Some(seed) => NoiseKernel::with_seed(seed),
                None => NoiseKernel::new(),
            },
            envelope: Envelope::new(),
            volume: SmoothedParam::new(0.8, sample_rate, time_constant),
            pan: SmoothedParam::new(0.0, sample_rate, time_constant),
            color: SmoothedParam::new(params.color, sample_rate, time_constant),
            params,
        }
    }

    /// Push new kernel inputs, volume and pan. Volume, pan and color glide
    /// toward their targets unless `instant`; the rest apply immediately.
    pub fn configure(&mut self, params: KernelParams, volume: f32, pan: f32, instant: bool) {
        let params = params.clamped();
        self.color.set(params.color, instant);
        self.volume.set(volume.clamp(0.0, 1.0), instant);
        self.pan.set(pan.clamp(-1.0, 1.0), instant);
        self.params = params;
    }

    pub fn params(&self) -> &KernelParams {
        &self.params
    }

    pub fn volume(&self) -> f32 {
        self.volume.target()
    }

    /// Render the stereo frame for audio-domain time `time`.
    #[inline]
    pub fn next_frame(&mut self, time: f64) -> (f32, f32) {
        let volume = self.volume.next();
        let pan = self.pan.next();
        let color = self.color.next();

        let gain = self.envelope.value_at(time) as f32 * volume;
        if gain == 0.0 {
            return (0.0, 0.0);
        }

        let params = KernelParams {
            color,
            ..self.params
        };
        let [l, r] = self.kernel.next_frame(&params);
        pan_stereo(l * gain, r * gain, pan)
    }
}

//! Signal routing graph: the fixed effect chain between the voice bus and
//! the master output.
//!
//! ```text
//! voices ─► pulse ─┬─► dry ─────────────────┐
//!                  ├─► resonant band-pass ×3 ┼─► grey EQ ─► saturation ─► reverb ─► auto-pan ─► analysis ─► master
//!                  └─► feedback comb ────────┘
//! ```
//!
//! Every stage is a dry/wet pair whose weights come from [`mix_targets`].
//! Weights glide toward their targets with the smoothing time constant;
//! filter coefficients are refreshed once per block.

use log::warn;

use crate::config::HostCapabilities;
use crate::settings::GlobalSettings;

use super::analysis::Analyser;
use super::delay::CombDelay;
use super::filter::{BiquadFilter, FilterType};
use super::lfo::{Lfo, Waveform};
use super::mixer::pan_stereo;
use super::param::SmoothedParam;
use super::reverb::Reverb;
use super::saturation::SaturationMode;

const GREY_LOW_FREQ: f64 = 100.0;
const GREY_HIGH_FREQ: f64 = 6000.0;
const GREY_LOW_DB: f64 = 10.0;
const GREY_HIGH_DB: f64 = 5.0;
const RESONANT_TAPS: usize = 3;
/// Time constant for master volume changes.
const VOLUME_TIME_CONSTANT: f64 = 0.1;

/// Gain and parameter targets for every stage, derived from global settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MixTargets {
    pub pulse_rate: f64,
    pub pulse_shape: Waveform,
    /// Pulse gain is `pulse_base + pulse_depth * lfo`.
    pub pulse_base: f32,
    pub pulse_depth: f32,
    pub resonant_dry: f32,
    /// Gain of each resonant tap.
    pub resonant_tap: f32,
    pub resonant_frequencies: [f64; RESONANT_TAPS],
    pub resonant_q: f64,
    pub comb_wet: f32,
    pub comb_feedback: f32,
    pub comb_delay: f64,
    pub grey_low_db: f64,
    pub grey_high_db: f64,
    pub saturation_dry: f32,
    pub saturation_wet: f32,
    pub saturation_mode: SaturationMode,
    pub reverb_dry: f32,
    pub reverb_wet: f32,
    pub reverb_feedback: f32,
    pub reverb_damping: f64,
    pub pan_rate: f64,
    pub pan_depth: f32,
    pub master: f32,
}

/// Evaluate the mix laws for `settings`.
pub fn mix_targets(settings: &GlobalSettings) -> MixTargets {
    let g = settings.sanitized();

    let (pulse_base, pulse_depth) = if g.pulse > 0.0 { (0.7, 0.3) } else { (1.0, 0.0) };

    let resonant = g.resonant.as_ref().filter(|r| r.enabled);
    let (resonant_dry, resonant_tap) = match resonant {
        Some(r) => (1.0 - 0.5 * r.mix as f32, r.mix as f32 / RESONANT_TAPS as f32),
        None => (1.0, 0.0),
    };
    let resonant_frequencies = match resonant {
        Some(r) => [r.frequency(0), r.frequency(1), r.frequency(2)],
        None => [200.0, 400.0, 600.0],
    };

    let comb = g.comb.as_ref().filter(|c| c.enabled);
    let (comb_wet, comb_feedback, comb_delay) = match comb {
        Some(c) => (c.mix as f32, c.feedback as f32, c.delay),
        None => (0.0, 0.0, 0.005),
    };

    let (grey_low_db, grey_high_db) = if g.grey { (GREY_LOW_DB, GREY_HIGH_DB) } else { (0.0, 0.0) };

    let sat = g.saturation as f32;
    let (saturation_dry, saturation_wet) = if sat > 0.0 { (1.0 - 0.5 * sat, sat) } else { (1.0, 0.0) };

    let mix = g.reverb_mix as f32;
    let (reverb_dry, reverb_wet) = if mix > 0.0 { (1.0 - 0.3 * mix, mix) } else { (1.0, 0.0) };

    let pan_active = g.pan_rate > 0.0 && g.pan_depth > 0.0;

    MixTargets {
        pulse_rate: g.pulse,
        pulse_shape: g.pulse_shape,
        pulse_base,
        pulse_depth,
        resonant_dry,
        resonant_tap,
        resonant_frequencies,
        resonant_q: resonant.map_or(10.0, |r| r.q),
        comb_wet,
        comb_feedback,
        comb_delay,
        grey_low_db,
        grey_high_db,
        saturation_dry,
        saturation_wet,
        saturation_mode: g.saturation_mode,
        reverb_dry,
        reverb_wet,
        reverb_feedback: g.reverb_size.feedback(),
        reverb_damping: g.reverb_size.damping_frequency(),
        pan_rate: g.pan_rate,
        pan_depth: if pan_active { g.pan_depth as f32 } else { 0.0 },
        master: g.master_volume as f32,
    }
}

/// Which optional stages the host can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stages {
    resonant: bool,
    grey: bool,
    comb: bool,
    saturation: bool,
    reverb: bool,
}

impl Stages {
    fn from_capabilities(caps: &HostCapabilities) -> Self {
        let stages = Stages {
            resonant: caps.biquad_filter,
            grey: caps.biquad_filter,
            comb: caps.delay_line,
            saturation: caps.wave_shaper,
            reverb: caps.delay_line && caps.biquad_filter,
        };
        if !caps.biquad_filter {
            warn!("Biquad filter unavailable: resonant, grey EQ and reverb stages bypassed");
        }
        if !caps.delay_line {
            warn!("Delay line unavailable: comb and reverb stages bypassed");
        }
        if !caps.wave_shaper {
            warn!("Wave shaper unavailable: saturation stage bypassed");
        }
        stages
    }
}

/// Smoothed stage weights.
#[derive(Debug, Clone)]
struct Weights {
    pulse_base: SmoothedParam,
    pulse_depth: SmoothedParam,
    resonant_dry: SmoothedParam,
    resonant_tap: SmoothedParam,
    comb_wet: SmoothedParam,
    comb_feedback: SmoothedParam,
    grey_low_db: SmoothedParam,
    grey_high_db: SmoothedParam,
    saturation_dry: SmoothedParam,
    saturation_wet: SmoothedParam,
    reverb_dry: SmoothedParam,
    reverb_wet: SmoothedParam,
    pan_depth: SmoothedParam,
    master: SmoothedParam,
}

impl Weights {
    fn new(t: &MixTargets, sample_rate: f64, tc: f64) -> Self {
        let p = |v: f32| SmoothedParam::new(v, sample_rate, tc);
        Weights {
            pulse_base: p(t.pulse_base),
            pulse_depth: p(t.pulse_depth),
            resonant_dry: p(t.resonant_dry),
            resonant_tap: p(t.resonant_tap),
            comb_wet: p(t.comb_wet),
            comb_feedback: p(t.comb_feedback),
            grey_low_db: p(t.grey_low_db as f32),
            grey_high_db: p(t.grey_high_db as f32),
            saturation_dry: p(t.saturation_dry),
            saturation_wet: p(t.saturation_wet),
            reverb_dry: p(t.reverb_dry),
            reverb_wet: p(t.reverb_wet),
            pan_depth: p(t.pan_depth),
            master: SmoothedParam::new(t.master, sample_rate, VOLUME_TIME_CONSTANT),
        }
    }

    fn set(&mut self, t: &MixTargets, instant: bool) {
        self.pulse_base.set(t.pulse_base, instant);
        self.pulse_depth.set(t.pulse_depth, instant);
        self.resonant_dry.set(t.resonant_dry, instant);
        self.resonant_tap.set(t.resonant_tap, instant);
        self.comb_wet.set(t.comb_wet, instant);
        self.comb_feedback.set(t.comb_feedback, instant);
        self.grey_low_db.set(t.grey_low_db as f32, instant);
        self.grey_high_db.set(t.grey_high_db as f32, instant);
        self.saturation_dry.set(t.saturation_dry, instant);
        self.saturation_wet.set(t.saturation_wet, instant);
        self.reverb_dry.set(t.reverb_dry, instant);
        self.reverb_wet.set(t.reverb_wet, instant);
        self.pan_depth.set(t.pan_depth, instant);
        self.master.set(t.master, instant);
    }
}

/// Left/right filter pair.
type StereoFilter = [BiquadFilter; 2];

fn stereo_filter(kind: FilterType, sample_rate: f64, frequency: f64, q: f64) -> StereoFilter {
    [
        BiquadFilter::with_params(kind, sample_rate, frequency, q),
        BiquadFilter::with_params(kind, sample_rate, frequency, q),
    ]
}

#[inline]
fn run_filter(f: &mut StereoFilter, l: f32, r: f32) -> (f32, f32) {
    (f[0].process(l as f64) as f32, f[1].process(r as f64) as f32)
}

/// The fixed effect chain.
#[derive(Debug, Clone)]
pub struct SignalRoutingGraph {
    stages: Stages,
    weights: Weights,
    pulse: Lfo,
    pan_lfo: Lfo,
    resonant: [StereoFilter; RESONANT_TAPS],
    comb: CombDelay,
    grey_low: StereoFilter,
    grey_high: StereoFilter,
    saturation_mode: SaturationMode,
    reverb: Reverb,
    analyser: Analyser,
}

impl SignalRoutingGraph {
    /// Build the graph configured for `settings`.
    pub fn new(
        sample_rate: f64,
        time_constant: f64,
        settings: &GlobalSettings,
        caps: &HostCapabilities,
    ) -> Self {
        let t = mix_targets(settings);
        let [f0, f1, f2] = t.resonant_frequencies;
        let mut grey_low = stereo_filter(FilterType::Lowshelf, sample_rate, GREY_LOW_FREQ, 1.0);
        let mut grey_high = stereo_filter(FilterType::Highshelf, sample_rate, GREY_HIGH_FREQ, 1.0);
        for f in grey_low.iter_mut() {
            f.set_gain_db(t.grey_low_db);
        }
        for f in grey_high.iter_mut() {
            f.set_gain_db(t.grey_high_db);
        }

        let mut graph = SignalRoutingGraph {
            stages: Stages::from_capabilities(caps),
            weights: Weights::new(&t, sample_rate, time_constant),
            pulse: Lfo::new(t.pulse_shape, t.pulse_rate, sample_rate),
            pan_lfo: Lfo::new(Waveform::Sine, t.pan_rate, sample_rate),
            resonant: [
                stereo_filter(FilterType::Bandpass, sample_rate, f0, t.resonant_q),
                stereo_filter(FilterType::Bandpass, sample_rate, f1, t.resonant_q),
                stereo_filter(FilterType::Bandpass, sample_rate, f2, t.resonant_q),
            ],
            comb: CombDelay::new(sample_rate),
            grey_low,
            grey_high,
            saturation_mode: t.saturation_mode,
            reverb: Reverb::new(sample_rate),
            analyser: Analyser::new(),
        };
        graph.apply_targets(&t, true);
        graph
    }

    /// Retarget every stage for new global settings.
    pub fn apply(&mut self, settings: &GlobalSettings, instant: bool) {
        let t = mix_targets(settings);
        self.apply_targets(&t, instant);
    }

    fn apply_targets(&mut self, t: &MixTargets, instant: bool) {
        self.weights.set(t, instant);

        self.pulse.waveform = t.pulse_shape;
        if t.pulse_rate > 0.0 {
            self.pulse.frequency = t.pulse_rate;
        }
        if t.pan_rate > 0.0 {
            self.pan_lfo.frequency = t.pan_rate;
        }

        for (pair, &freq) in self.resonant.iter_mut().zip(&t.resonant_frequencies) {
            for f in pair.iter_mut() {
                f.set_frequency(freq);
                f.set_q(t.resonant_q);
            }
        }
        if t.comb_wet > 0.0 {
            self.comb.set_delay_time(t.comb_delay);
        }
        self.saturation_mode = t.saturation_mode;
        if t.reverb_wet > 0.0 {
            self.reverb.feedback = t.reverb_feedback;
            self.reverb.set_damping_frequency(t.reverb_damping);
        }
    }

    /// Set the master gain alone.
    pub fn set_master(&mut self, volume: f32, instant: bool) {
        self.weights.master.set(volume.clamp(0.0, 1.0), instant);
    }

    /// Refresh block-rate parameters before rendering `frames` frames.
    pub fn begin_block(&mut self, frames: usize) {
        let low = self.weights.grey_low_db.skip(frames) as f64;
        let high = self.weights.grey_high_db.skip(frames) as f64;
        for f in self.grey_low.iter_mut() {
            f.set_gain_db(low);
        }
        for f in self.grey_high.iter_mut() {
            f.set_gain_db(high);
        }
        self.comb.feedback = self.weights.comb_feedback.skip(frames);
    }

    /// Run one summed voice frame through the chain.
    #[inline]
    pub fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let w = &mut self.weights;

        // Pulse
        let pulse = w.pulse_base.next() + w.pulse_depth.next() * self.pulse.next_sample() as f32;
        let (pl, pr) = (left * pulse, right * pulse);

        // Dry + resonant taps + comb
        let dry = w.resonant_dry.next();
        let tap = w.resonant_tap.next();
        let comb_wet = w.comb_wet.next();
        let (mut l, mut r) = (pl * dry, pr * dry);
        if self.stages.resonant {
            for pair in self.resonant.iter_mut() {
                let (rl, rr) = run_filter(pair, pl, pr);
                l += rl * tap;
                r += rr * tap;
            }
        }
        if self.stages.comb {
            let (cl, cr) = self.comb.process(pl, pr);
            l += cl * comb_wet;
            r += cr * comb_wet;
        }

        // Grey EQ
        if self.stages.grey {
            (l, r) = run_filter(&mut self.grey_low, l, r);
            (l, r) = run_filter(&mut self.grey_high, l, r);
        }

        // Saturation
        let sat_dry = w.saturation_dry.next();
        let sat_wet = w.saturation_wet.next();
        if self.stages.saturation {
            let mode = self.saturation_mode;
            l = l * sat_dry + mode.shape(l) * sat_wet;
            r = r * sat_dry + mode.shape(r) * sat_wet;
        }

        // Reverb
        let rev_dry = w.reverb_dry.next();
        let rev_wet = w.reverb_wet.next();
        if self.stages.reverb {
            let (wl, wr) = self.reverb.process(l, r);
            l = l * rev_dry + wl * rev_wet;
            r = r * rev_dry + wr * rev_wet;
        }

        // Auto-pan
        let pan = w.pan_depth.next() * self.pan_lfo.next_sample() as f32;
        (l, r) = pan_stereo(l, r, pan);

        self.analyser.push(l, r);

        let master = w.master.next();
        (l * master, r * master)
    }

    pub fn analyser(&self) -> &Analyser {
        &self.analyser
    }

    pub fn analyser_mut(&mut self) -> &mut Analyser {
        &mut self.analyser
    }
}

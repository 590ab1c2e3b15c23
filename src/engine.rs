//! Audio engine: the live control surface.
//!
//! Owns the voices, the routing graph, the clock and the timer queue. All
//! mutation goes through `&mut AudioEngine`, so parameter changes land
//! between blocks and a block always sees a consistent state.
//!
//! Hosts drive the engine in one of two ways:
//! - call [`AudioEngine::run`] (timers are fired block by block), or
//! - call [`AudioEngine::poll_timers`] followed by
//!   [`AudioEngine::process_block`] from their own audio callback.

use log::{debug, info, warn};
use serde_json::Value;

use crate::clock::{Clock, FrameClock, TimerQueue};
use crate::compiler::{Composition, NoteEvent, Timeline};
use crate::config::{EngineConfig, HostCapabilities};
use crate::dsp::envelope::Stage;
use crate::dsp::graph::SignalRoutingGraph;
use crate::dsp::mixer::Mixer;
use crate::dsp::noise::CHANNELS;
use crate::dsp::renderer;
use crate::dsp::voice::VoiceChain;
use crate::error::{ExportError, InitError, NoiseError};
use crate::scheduler::{self, CompositionRun, TimerAction};
use crate::settings::{GlobalChanges, GlobalSettings, Preset, VoiceSettings};

/// Release used when a voice is disabled while playing.
const DISABLE_RELEASE: f64 = 0.05;

/// One voice slot.
#[derive(Debug, Clone)]
struct Voice {
    enabled: bool,
    settings: VoiceSettings,
    /// Created on first use.
    chain: Option<VoiceChain>,
    /// Between `start` and the end of its release.
    playing: bool,
    /// Cleared by `stop`; a pending loop restart checks it.
    looping: bool,
}

impl Voice {
    fn new(enabled: bool) -> Self {
        Voice {
            enabled,
            settings: VoiceSettings::default(),
            chain: None,
            playing: false,
            looping: false,
        }
    }
}

/// The live noise engine.
pub struct AudioEngine<C: Clock = FrameClock> {
    config: EngineConfig,
    caps: HostCapabilities,
    sample_rate: f64,
    clock: C,
    voices: Vec<Voice>,
    global: GlobalSettings,
    graph: SignalRoutingGraph,
    bus: Mixer,
    timers: TimerQueue<TimerAction>,
    playing: bool,
    suspended: bool,
    torn_down: bool,
    next_run: u64,
    active_run: Option<u64>,
}

impl AudioEngine<FrameClock> {
    /// Create an engine driven by rendered frames.
    pub fn init(config: EngineConfig, caps: HostCapabilities) -> Result<Self, InitError> {
        let clock = FrameClock::new(config.sample_rate as f64);
        AudioEngine::with_clock(config, caps, clock)
    }
}

impl<C: Clock> AudioEngine<C> {
    /// Create an engine on a caller-supplied clock.
    pub fn with_clock(config: EngineConfig, caps: HostCapabilities, clock: C) -> Result<Self, InitError> {
        caps.check_required()?;
        config.validate()?;

        let sample_rate = config.sample_rate as f64;
        let global = GlobalSettings::default();
        let graph = SignalRoutingGraph::new(sample_rate, config.smoothing_time_constant, &global, &caps);
        let voices = (0..config.interactive_voices).map(|i| Voice::new(i == 0)).collect();

        let mut engine = AudioEngine {
            config,
            caps,
            sample_rate,
            clock,
            voices,
            global,
            graph,
            bus: Mixer::new(),
            timers: TimerQueue::new(),
            playing: false,
            suspended: false,
            torn_down: false,
            next_run: 0,
            active_run: None,
        };
        engine.ensure_chain(0);
        info!(
            "Audio engine ready: {} Hz, {} voices",
            engine.config.sample_rate, engine.config.interactive_voices
        );
        Ok(engine)
    }

    // ── Queries ─────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &HostCapabilities {
        &self.caps
    }

    pub fn global_settings(&self) -> &GlobalSettings {
        &self.global
    }

    pub fn voice_settings(&self, index: usize) -> Option<&VoiceSettings> {
        self.voices.get(index).map(|v| &v.settings)
    }

    pub fn is_voice_enabled(&self, index: usize) -> bool {
        self.voices.get(index).is_some_and(|v| v.enabled)
    }

    /// True while the voice is between `start` and the end of its release.
    pub fn is_voice_playing(&self, index: usize) -> bool {
        self.voices.get(index).is_some_and(|v| v.playing)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Envelope gain of a voice at clock time `time`.
    pub fn voice_gain_at(&self, index: usize, time: f64) -> Option<f64> {
        let chain = self.voices.get(index)?.chain.as_ref()?;
        Some(chain.envelope.value_at(time))
    }

    /// Envelope gain of a voice now.
    pub fn voice_gain(&self, index: usize) -> Option<f64> {
        self.voice_gain_at(index, self.clock.now())
    }

    /// Envelope stage of a voice now.
    pub fn voice_stage(&self, index: usize) -> Option<Stage> {
        let chain = self.voices.get(index)?.chain.as_ref()?;
        Some(chain.envelope.stage_at(self.clock.now()))
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn graph(&self) -> &SignalRoutingGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SignalRoutingGraph {
        &mut self.graph
    }

    // ── Settings ────────────────────────────────────────────

    /// Replace a voice's settings. Out-of-range indices are ignored.
    pub fn apply_voice_settings(&mut self, index: usize, settings: &VoiceSettings, instant: bool) {
        let Some(voice) = self.voices.get_mut(index) else {
            return;
        };
        voice.settings = settings.sanitized();
        self.configure_voice(index, instant);
    }

    /// Replace the ambient settings and retarget the graph and every voice.
    pub fn apply_global_settings(&mut self, settings: &GlobalSettings, instant: bool) {
        self.global = settings.sanitized();
        self.graph.apply(&self.global, instant);
        for index in 0..self.voices.len() {
            self.configure_voice(index, instant);
        }
    }

    /// Apply a stored preset: ambient settings first, then the voices.
    ///
    /// The master volume is a listener setting and survives preset changes.
    pub fn apply_preset(&mut self, preset: &Preset, instant: bool) {
        let global = GlobalSettings {
            master_volume: self.global.master_volume,
            ..preset.global.clone()
        };
        self.apply_global_settings(&global, instant);

        match &preset.voices {
            Some(voices) => {
                for (index, entry) in voices.iter().enumerate().take(self.voices.len()) {
                    if index > 0 {
                        if entry.enabled {
                            self.enable_voice(index);
                        } else {
                            self.disable_voice(index);
                        }
                    }
                    self.apply_voice_settings(index, &entry.settings, instant);
                }
            }
            None => {
                self.apply_voice_settings(0, &preset.single_voice(), instant);
                for index in 1..self.voices.len() {
                    self.disable_voice(index);
                }
            }
        }
    }

    /// Set the master output gain.
    pub fn set_volume(&mut self, volume: f64) {
        if !volume.is_finite() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.global.master_volume = volume;
        self.graph.set_master(volume as f32, false);
    }

    fn ensure_chain(&mut self, index: usize) {
        let Some(voice) = self.voices.get_mut(index) else {
            return;
        };
        if voice.chain.is_none() {
            let seed = self.config.stream_seed(index as u64);
            voice.chain = Some(VoiceChain::new(self.sample_rate, self.config.smoothing_time_constant, seed));
            debug!("Voice {index} created");
            self.configure_voice(index, true);
        }
    }

    fn configure_voice(&mut self, index: usize, instant: bool) {
        let Some(voice) = self.voices.get_mut(index) else {
            return;
        };
        if let Some(chain) = voice.chain.as_mut() {
            let s = &voice.settings;
            chain.configure(s.kernel_params(&self.global), s.volume as f32, s.pan as f32, instant);
        }
    }

    // ── Voice lifecycle ─────────────────────────────────────

    /// Enable a voice, starting it if the engine is playing.
    pub fn enable_voice(&mut self, index: usize) {
        if index >= self.voices.len() {
            return;
        }
        self.ensure_chain(index);
        self.voices[index].enabled = true;
        if self.playing {
            let now = self.clock.now();
            self.start_voice(index, now);
        }
    }

    /// Disable a voice, fading it out if playing. Voice 0 cannot be disabled.
    pub fn disable_voice(&mut self, index: usize) {
        if index == 0 || index >= self.voices.len() {
            return;
        }
        self.voices[index].enabled = false;
        if self.voices[index].playing {
            let now = self.clock.now();
            self.stop_voice(index, DISABLE_RELEASE, now);
        }
    }

    /// Start every enabled voice.
    pub fn start(&mut self) {
        if self.torn_down {
            return;
        }
        if self.suspended {
            self.resume();
        }
        let now = self.clock.now();
        for index in 0..self.voices.len() {
            if self.voices[index].enabled {
                self.ensure_chain(index);
                self.start_voice(index, now);
            }
        }
        self.playing = true;
        info!("Playback started");
    }

    /// Fade every voice out over `release` seconds, then call `on_complete`.
    ///
    /// Also cancels any composition run in progress.
    pub fn stop(&mut self, release: f64, on_complete: Option<Box<dyn FnOnce()>>) {
        if self.torn_down {
            return;
        }
        let release = if release.is_finite() { release.max(0.0) } else { self.config.default_stop_release };
        let now = self.clock.now();
        self.stop_all(release, now);
        if scheduler::cancel_runs(&mut self.timers) > 0 {
            info!("Composition run cancelled by stop");
        }
        self.active_run = None;
        if let Some(callback) = on_complete {
            self.timers.schedule(now + release + self.config.loop_guard, TimerAction::StopComplete(callback));
        }
        info!("Playback stopped ({release}s release)");
    }

    /// Stop with the short disable release.
    pub fn stop_immediate(&mut self) {
        self.stop(DISABLE_RELEASE, None);
    }

    /// Freeze the clock and output silence; filter and envelope state are kept.
    pub fn suspend(&mut self) {
        if !self.suspended {
            self.suspended = true;
            self.clock.set_suspended(true);
            debug!("Engine suspended");
        }
    }

    pub fn resume(&mut self) {
        if self.suspended {
            self.suspended = false;
            self.clock.set_suspended(false);
            debug!("Engine resumed");
        }
    }

    /// Destroy every voice and cancel every timer. The engine stays silent afterwards.
    pub fn teardown(&mut self) {
        self.timers.clear();
        self.voices.clear();
        self.playing = false;
        self.active_run = None;
        self.torn_down = true;
        info!("Engine torn down");
    }

    fn cancel_voice_timers(&mut self, index: usize) {
        self.timers.cancel_matching(|a| a.lifecycle_voice() == Some(index));
    }

    /// Attack from zero at `at`; schedules the release when a hold is set.
    fn start_voice(&mut self, index: usize, at: f64) {
        self.cancel_voice_timers(index);
        let Some(voice) = self.voices.get_mut(index) else {
            return;
        };
        let Some(chain) = voice.chain.as_mut() else {
            return;
        };
        if !voice.enabled {
            return;
        }
        let sustain_start = chain.envelope.start(&voice.settings.adsr(), at);
        voice.playing = true;
        voice.looping = voice.settings.looping;
        if let Some(hold) = voice.settings.hold_duration.filter(|h| *h > 0.0) {
            self.timers.schedule(sustain_start + hold, TimerAction::Release { voice: index });
        }
        debug!("Voice {index} started at {at:.3}");
    }

    /// End the hold: ramp to zero, then loop or go idle after the guard.
    fn trigger_release(&mut self, index: usize, at: f64) {
        let guard = self.config.loop_guard;
        let Some(voice) = self.voices.get_mut(index) else {
            return;
        };
        let Some(chain) = voice.chain.as_mut() else {
            return;
        };
        if !voice.playing {
            return;
        }
        let end = chain.envelope.release(voice.settings.release, at);
        let action = if voice.looping {
            TimerAction::LoopRestart { voice: index }
        } else {
            TimerAction::MarkIdle { voice: index }
        };
        self.timers.schedule(end + guard, action);
    }

    fn stop_voice(&mut self, index: usize, release: f64, at: f64) {
        self.cancel_voice_timers(index);
        let Some(voice) = self.voices.get_mut(index) else {
            return;
        };
        voice.looping = false;
        voice.playing = false;
        if let Some(chain) = voice.chain.as_mut() {
            chain.envelope.release(release, at);
        }
    }

    fn stop_all(&mut self, release: f64, at: f64) {
        for index in 0..self.voices.len() {
            if self.voices[index].chain.is_some() {
                self.stop_voice(index, release, at);
            }
        }
        self.playing = false;
    }

    // ── Timers ──────────────────────────────────────────────

    /// Fire every timer due at or before the current clock time.
    pub fn poll_timers(&mut self) {
        let now = self.clock.now();
        self.fire_until(now);
    }

    fn fire_until(&mut self, until: f64) {
        while let Some((at, action)) = self.timers.pop_due(until) {
            self.fire(at, action);
        }
    }

    fn fire(&mut self, at: f64, action: TimerAction) {
        match action {
            TimerAction::Release { voice } => self.trigger_release(voice, at),
            TimerAction::LoopRestart { voice } => {
                let resume = self
                    .voices
                    .get(voice)
                    .is_some_and(|v| v.looping && v.playing && v.enabled);
                if resume {
                    self.start_voice(voice, at);
                }
            }
            TimerAction::MarkIdle { voice } => {
                if let Some(v) = self.voices.get_mut(voice) {
                    v.playing = false;
                }
            }
            TimerAction::StopComplete(callback) => callback(),
            TimerAction::CompositionNote { run, voice, note } => {
                if self.active_run == Some(run) {
                    self.composition_note(voice, &note, at);
                }
            }
            TimerAction::CompositionGlobal { run, changes } => {
                if self.active_run == Some(run) {
                    self.composition_global(&changes);
                }
            }
            TimerAction::CompositionEnd { run } => {
                if self.active_run == Some(run) {
                    self.composition_end(at);
                }
            }
        }
    }

    // ── Composition ─────────────────────────────────────────

    /// Validate and play a composition document live.
    pub fn play_composition(&mut self, doc: &Value) -> Result<CompositionRun, NoiseError> {
        let composition = Composition::from_value(doc, self.config.max_timeline_events)?;
        self.play_timeline(&composition.flatten())
    }

    /// Validate and play a composition given as JSON text.
    pub fn play_composition_json(&mut self, text: &str) -> Result<CompositionRun, NoiseError> {
        let composition = Composition::from_json(text, self.config.max_timeline_events)?;
        self.play_timeline(&composition.flatten())
    }

    /// Dispatch an already flattened timeline, replacing any run in progress.
    ///
    /// Voices of a replaced run fade out before the new run's first event.
    pub fn play_timeline(&mut self, timeline: &Timeline) -> Result<CompositionRun, NoiseError> {
        if self.torn_down {
            return Err(InitError::TornDown.into());
        }
        if self.suspended {
            self.resume();
        }
        let now = self.clock.now();
        if let Some(previous) = self.active_run.take() {
            debug!("Composition run {previous} replaced");
            let fade = DISABLE_RELEASE.min(self.config.scheduling_lead);
            self.stop_all(fade, now);
        }
        let id = self.next_run;
        self.next_run += 1;
        self.active_run = Some(id);
        self.playing = true;
        Ok(scheduler::dispatch(&mut self.timers, timeline, id, now, &self.config))
    }

    fn composition_note(&mut self, index: usize, note: &NoteEvent, at: f64) {
        if index >= self.config.composition_voice_ceiling {
            warn!("Composition voice {index} beyond ceiling; event dropped");
            return;
        }
        while self.voices.len() <= index {
            self.voices.push(Voice::new(false));
        }
        self.ensure_chain(index);
        let voice = &mut self.voices[index];
        voice.enabled = true;
        voice.settings = note.voice_settings();
        self.configure_voice(index, true);
        self.start_voice(index, at);
    }

    fn composition_global(&mut self, changes: &GlobalChanges) {
        let mut global = self.global.clone();
        changes.merge_into(&mut global);
        self.apply_global_settings(&global, true);
    }

    fn composition_end(&mut self, at: f64) {
        self.stop_all(self.config.default_stop_release, at);
        let baseline = self.config.interactive_voices;
        if self.voices.len() > baseline {
            debug!("Pruning {} composition voices", self.voices.len() - baseline);
            self.voices.truncate(baseline);
        }
        for voice in self.voices.iter_mut().skip(1) {
            voice.enabled = false;
        }
        self.active_run = None;
        info!("Composition finished");
    }

    // ── Rendering ───────────────────────────────────────────

    /// Render one block of interleaved stereo into `out`.
    ///
    /// Timers are not fired here; see [`poll_timers`](Self::poll_timers).
    pub fn process_block(&mut self, out: &mut [f32]) {
        let frames = out.len() / CHANNELS;
        if self.suspended || self.torn_down {
            out.fill(0.0);
            return;
        }

        let t0 = self.clock.now();
        self.bus.clear(frames);
        for voice in self.voices.iter_mut() {
            if let Some(chain) = voice.chain.as_mut() {
                chain.envelope.prune_before(t0);
                for i in 0..frames {
                    let (l, r) = chain.next_frame(t0 + i as f64 / self.sample_rate);
                    self.bus.add(i, l, r);
                }
            }
        }

        self.graph.begin_block(frames);
        for (i, frame) in out.chunks_exact_mut(CHANNELS).enumerate() {
            let (l, r) = self.bus.frame(i);
            let (l, r) = self.graph.process_frame(l, r);
            frame[0] = l;
            frame[1] = r;
        }
        self.clock.frames_rendered(frames, self.sample_rate);
    }

    /// Render `frames` frames, firing timers before each block.
    pub fn run(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * CHANNELS];
        let block = self.config.block_size;
        for chunk in out.chunks_mut(block * CHANNELS) {
            let block_frames = chunk.len() / CHANNELS;
            let block_end = self.clock.now() + block_frames as f64 / self.sample_rate;
            if !self.suspended {
                // Timers strictly inside this block fire now; envelopes are
                // evaluated at absolute time, so the change still lands on
                // its exact sample.
                while let Some(deadline) = self.timers.next_deadline() {
                    if deadline >= block_end {
                        break;
                    }
                    self.fire_until(deadline);
                }
            }
            self.process_block(chunk);
        }
        out
    }

    // ── Export ──────────────────────────────────────────────

    /// Render the current settings for `duration` seconds to WAV bytes.
    ///
    /// Runs on a fresh engine so live playback is untouched.
    pub fn export_to_file(&self, duration: f64) -> Result<Vec<u8>, ExportError> {
        if !self.caps.offline_rendering {
            return Err(ExportError::Unsupported("offline rendering"));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(ExportError::InvalidDuration(duration));
        }
        if duration > self.config.max_render_seconds {
            return Err(ExportError::TooLong {
                seconds: duration,
                limit: self.config.max_render_seconds,
            });
        }
        let frames = (duration * self.sample_rate).round() as usize;
        renderer::check_wav_size(frames)?;

        let mut offline = AudioEngine::<FrameClock>::init(self.config.clone(), self.caps)
            .map_err(|_| ExportError::Unsupported("offline engine"))?;
        offline.apply_global_settings(&self.global, true);
        for (index, voice) in self.voices.iter().enumerate().take(offline.voices.len()) {
            if voice.enabled {
                offline.enable_voice(index);
            }
            offline.apply_voice_settings(index, &voice.settings, true);
        }
        offline.start();

        let samples = offline.run(frames);
        info!("Exported {duration}s of audio");
        Ok(renderer::encode_wav(&renderer::to_pcm_i16(&samples), self.config.sample_rate, 2))
    }

    /// Render a composition document offline to WAV bytes.
    pub fn export_composition(&self, doc: &Value) -> Result<Vec<u8>, NoiseError> {
        let composition = Composition::from_value(doc, self.config.max_timeline_events)?;
        let timeline = composition.flatten();
        Ok(renderer::render_wav(&timeline, &self.global, &self.config, &self.caps)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::settings::VoicePreset;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn manual() -> (AudioEngine<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let config = EngineConfig {
            seed: Some(3),
            ..EngineConfig::default()
        };
        let engine = AudioEngine::with_clock(config, HostCapabilities::default(), clock.clone()).unwrap();
        (engine, clock)
    }

    fn step_to(engine: &mut AudioEngine<ManualClock>, clock: &ManualClock, t: f64) {
        clock.set(t);
        engine.poll_timers();
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn init_requires_capabilities() {
        let caps = HostCapabilities {
            offline_rendering: false,
            ..HostCapabilities::default()
        };
        let err = AudioEngine::init(EngineConfig::default(), caps).err();
        assert_eq!(err, Some(InitError::MissingCapability("offline rendering")));
    }

    #[test]
    fn voice_zero_exists_and_cannot_be_disabled() {
        let (mut engine, _) = manual();
        assert_eq!(engine.voice_count(), 4);
        assert!(engine.is_voice_enabled(0));
        assert!(!engine.is_voice_enabled(1));
        engine.disable_voice(0);
        assert!(engine.is_voice_enabled(0));
        engine.enable_voice(9);
        assert_eq!(engine.voice_count(), 4, "Out-of-range enable is a no-op");
    }

    #[test]
    fn start_holds_sustain_without_duration() {
        let (mut engine, clock) = manual();
        let settings = VoiceSettings {
            attack: 1.0,
            decay: 0.5,
            sustain: 0.4,
            ..VoiceSettings::default()
        };
        engine.apply_voice_settings(0, &settings, true);
        engine.start();

        assert!(close(engine.voice_gain_at(0, 0.5).unwrap(), 0.5));
        assert!(close(engine.voice_gain_at(0, 1.0).unwrap(), 1.0));
        assert!(close(engine.voice_gain_at(0, 1.25).unwrap(), 0.7));
        step_to(&mut engine, &clock, 1_000.0);
        assert!(close(engine.voice_gain(0).unwrap(), 0.4));
        assert_eq!(engine.voice_stage(0), Some(Stage::Sustaining));
        assert!(engine.is_voice_playing(0));
    }

    #[test]
    fn looping_voice_cycles() {
        let (mut engine, clock) = manual();
        let settings = VoiceSettings {
            attack: 1.0,
            decay: 0.0,
            sustain: 1.0,
            release: 1.0,
            hold_duration: Some(2.0),
            looping: true,
            ..VoiceSettings::default()
        };
        engine.apply_voice_settings(0, &settings, true);
        engine.start();

        // attack 1 + hold 2 + release 1 + guard 0.05 per cycle
        let period = 4.05;
        for cycle in 0..3 {
            let t0 = cycle as f64 * period;
            step_to(&mut engine, &clock, t0 + 0.5);
            assert_eq!(engine.voice_stage(0), Some(Stage::Attacking), "cycle {cycle}");
            step_to(&mut engine, &clock, t0 + 2.0);
            assert_eq!(engine.voice_stage(0), Some(Stage::Sustaining), "cycle {cycle}");
            step_to(&mut engine, &clock, t0 + 3.5);
            assert_eq!(engine.voice_stage(0), Some(Stage::Releasing), "cycle {cycle}");
            assert!(close(engine.voice_gain(0).unwrap(), 0.5), "cycle {cycle}");
            step_to(&mut engine, &clock, t0 + 4.02);
            assert!(close(engine.voice_gain(0).unwrap(), 0.0), "cycle {cycle}");
        }
        step_to(&mut engine, &clock, 3.0 * period + 0.5);
        assert!(close(engine.voice_gain(0).unwrap(), 0.5), "Fourth cycle should be attacking");
    }

    #[test]
    fn non_looping_voice_goes_idle() {
        let (mut engine, clock) = manual();
        let settings = VoiceSettings {
            attack: 0.5,
            release: 0.5,
            hold_duration: Some(1.0),
            ..VoiceSettings::default()
        };
        engine.apply_voice_settings(0, &settings, true);
        engine.start();
        step_to(&mut engine, &clock, 1.6);
        assert!(engine.is_voice_playing(0));
        step_to(&mut engine, &clock, 2.06);
        assert!(!engine.is_voice_playing(0));
        assert_eq!(engine.pending_timers(), 0);
    }

    #[test]
    fn stop_cancels_loop_and_calls_back() {
        let (mut engine, clock) = manual();
        let settings = VoiceSettings {
            attack: 0.1,
            hold_duration: Some(0.5),
            looping: true,
            ..VoiceSettings::default()
        };
        engine.apply_voice_settings(0, &settings, true);
        engine.start();
        step_to(&mut engine, &clock, 0.3);

        let done = Rc::new(Cell::new(false));
        let flag = done.clone();
        engine.stop(0.2, Some(Box::new(move || flag.set(true))));
        assert!(!engine.is_playing());

        step_to(&mut engine, &clock, 0.4);
        assert!(close(engine.voice_gain(0).unwrap(), 0.5));
        step_to(&mut engine, &clock, 0.56);
        assert!(done.get(), "Completion fires after release + guard");
        step_to(&mut engine, &clock, 10.0);
        assert!(close(engine.voice_gain(0).unwrap(), 0.0), "Loop must not restart after stop");
    }

    #[test]
    fn disable_fades_voice_out() {
        let (mut engine, clock) = manual();
        engine.enable_voice(2);
        engine.apply_voice_settings(2, &VoiceSettings { attack: 0.0, ..VoiceSettings::default() }, true);
        engine.start();
        step_to(&mut engine, &clock, 1.0);
        engine.disable_voice(2);
        assert!(!engine.is_voice_enabled(2));
        assert!(close(engine.voice_gain_at(2, 1.025).unwrap(), 0.5));
        assert!(close(engine.voice_gain_at(2, 1.05).unwrap(), 0.0));
    }

    #[test]
    fn single_voice_preset_disables_others() {
        let (mut engine, _) = manual();
        engine.enable_voice(1);
        engine.set_volume(0.9);
        let preset: Preset = serde_json::from_value(json!({ "color": 1.0, "reverbMix": 0.3 })).unwrap();
        engine.apply_preset(&preset, true);
        assert!(!engine.is_voice_enabled(1));
        assert_eq!(engine.voice_settings(0).unwrap().color, 1.0);
        assert_eq!(engine.global_settings().reverb_mix, 0.3);
        assert_eq!(engine.global_settings().master_volume, 0.9, "Volume survives presets");
    }

    #[test]
    fn multi_voice_preset_enables_listed_voices() {
        let (mut engine, _) = manual();
        let preset = Preset {
            voices: Some(vec![
                VoicePreset::default(),
                VoicePreset {
                    enabled: true,
                    settings: VoiceSettings {
                        color: 0.5,
                        ..VoiceSettings::default()
                    },
                },
            ]),
            ..Preset::default()
        };
        engine.apply_preset(&preset, true);
        assert!(engine.is_voice_enabled(1));
        assert!(!engine.is_voice_enabled(2));
        assert_eq!(engine.voice_settings(1).unwrap().color, 0.5);
    }

    #[test]
    fn live_and_offline_envelopes_match() {
        // The zero-hold note sustains until the next note at 3.08333 s, which
        // falls between frames 24666 and 24667.
        let doc = json!({
            "voices": {
                "a": [ { "color": 3, "attack": 0.4, "decay": 0.3, "sustain": 0.6, "duration": 0.8, "release": 0.5 },
                       { "wait": 0.25 },
                       { "color": 1, "attack": 0.2, "duration": 0, "release": 0.3 },
                       { "wait": 0.33333 },
                       { "color": 4, "attack": 0.1, "decay": 0.2, "sustain": 0.5, "duration": 0.4, "release": 0.2 } ],
                "b": [ { "wait": 0.5 }, { "color": 1, "attack": 1.0, "duration": 0.2, "release": 1.0 } ]
            }
        });
        let timeline = Composition::from_value(&doc, 1000).unwrap().flatten();
        let config = EngineConfig {
            sample_rate: 8000,
            seed: Some(3),
            ..EngineConfig::default()
        };
        let offline = renderer::envelope_frames(&timeline, &config);
        assert_eq!(offline.len(), 2);

        let clock = ManualClock::new();
        let mut engine = AudioEngine::with_clock(config, HostCapabilities::default(), clock.clone()).unwrap();
        let origin = engine.play_timeline(&timeline).unwrap().origin();

        for frame in 0..offline[0].len() {
            let t = frame as f64 / 8000.0;
            step_to(&mut engine, &clock, origin + t);
            for (voice, gains) in offline.iter().enumerate() {
                let live = engine.voice_gain_at(voice, origin + t).unwrap_or(0.0);
                let expected = gains[frame];
                assert!(
                    (live - expected).abs() < 1e-6,
                    "voice {voice} at frame {frame}: live {live} offline {expected}"
                );
            }
        }
        assert!(offline[0][24666] > 0.99, "Zero hold still sustaining");
    }

    #[test]
    fn new_run_silences_previous_run() {
        let (mut engine, clock) = manual();
        let first = engine
            .play_composition(&json!({ "voices": { "a": [ { "color": 2, "attack": 0, "duration": 5 } ] } }))
            .unwrap();
        step_to(&mut engine, &clock, first.origin() + 0.5);
        assert_eq!(engine.voice_gain(0), Some(1.0));

        let second = engine
            .play_composition(&json!({ "voices": { "a": [ { "wait": 3 }, { "color": 2, "duration": 1 } ] } }))
            .unwrap();
        step_to(&mut engine, &clock, second.origin() + 1.0);
        assert_eq!(engine.voice_gain(0), Some(0.0), "Previous run must not keep sounding");
        assert_eq!(engine.pending_timers(), 2, "Only the new run's note and end remain");
    }

    #[test]
    fn torn_down_engine_rejects_compositions() {
        let (mut engine, clock) = manual();
        engine.teardown();
        let err = engine.play_composition(&json!({ "voices": { "a": [ { "color": 1, "duration": 1 } ] } }));
        assert_eq!(err, Err(NoiseError::Init(InitError::TornDown)));
        step_to(&mut engine, &clock, 0.5);
        assert!(!engine.is_playing());
        assert_eq!(engine.voice_count(), 0);
        assert_eq!(engine.pending_timers(), 0);
    }

    #[test]
    fn composition_end_prunes_extra_voices() {
        let config = EngineConfig {
            interactive_voices: 2,
            ..EngineConfig::default()
        };
        let clock = ManualClock::new();
        let mut engine = AudioEngine::with_clock(config, HostCapabilities::default(), clock.clone()).unwrap();
        let run = engine
            .play_composition(&json!({
                "voices": {
                    "a": [ { "color": 1, "duration": 0.5 } ],
                    "b": [ { "color": 2, "duration": 0.5 } ],
                    "c": [ { "color": 3, "duration": 0.5 } ]
                }
            }))
            .unwrap();

        step_to(&mut engine, &clock, run.origin() + 0.1);
        assert_eq!(engine.voice_count(), 3);
        assert!(engine.is_voice_enabled(2));

        let end = run.end_time(engine.config());
        step_to(&mut engine, &clock, end + 0.01);
        assert_eq!(engine.voice_count(), 2);
        assert!(!engine.is_voice_enabled(1));
        assert!(!engine.is_playing());
    }

    #[test]
    fn composition_global_changes_ambient_state() {
        let (mut engine, clock) = manual();
        let run = engine
            .play_composition_json(
                r#"{ "voices": { "a": [ { "color": 2, "duration": 2 } ] },
                     "global": [ { "wait": 1, "pulse": 2, "bitDepth": 8 } ] }"#,
            )
            .unwrap();
        step_to(&mut engine, &clock, run.origin() + 0.5);
        assert_eq!(engine.global_settings().pulse, 0.0);
        step_to(&mut engine, &clock, run.origin() + 1.0);
        assert_eq!(engine.global_settings().pulse, 2.0);
        assert_eq!(engine.global_settings().bit_depth, 8);
    }

    #[test]
    fn invalid_composition_never_dispatches() {
        let (mut engine, _) = manual();
        let err = engine.play_composition(&json!({ "voices": { "a": [ { "color": 1 } ] } }));
        assert!(matches!(err, Err(NoiseError::Validation(_))));
        assert_eq!(engine.pending_timers(), 0);
        assert!(!engine.is_playing());
    }

    #[test]
    fn run_advances_frame_clock_and_renders() {
        let config = EngineConfig {
            sample_rate: 8000,
            seed: Some(5),
            ..EngineConfig::default()
        };
        let mut engine = AudioEngine::init(config, HostCapabilities::default()).unwrap();
        engine.apply_voice_settings(0, &VoiceSettings { attack: 0.0, ..VoiceSettings::default() }, true);
        engine.start();
        let out = engine.run(800);
        assert_eq!(out.len(), 1600);
        assert!((engine.now() - 0.1).abs() < 1e-12);
        assert!(out.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn run_fires_timers_within_block() {
        let config = EngineConfig {
            sample_rate: 8000,
            block_size: 800,
            ..EngineConfig::default()
        };
        let mut engine = AudioEngine::init(config, HostCapabilities::default()).unwrap();
        engine.apply_voice_settings(
            0,
            &VoiceSettings {
                attack: 0.0,
                release: 0.0,
                hold_duration: Some(0.25),
                ..VoiceSettings::default()
            },
            true,
        );
        engine.start();
        let out = engine.run(3200);
        let frame = |i: usize| out[i * 2].abs().max(out[i * 2 + 1].abs());
        // The release at 0.25 s falls inside the block starting at frame 1600.
        assert!((1600..2000).any(|i| frame(i) > 0.0), "Audible before the release");
        assert!((2001..3200).all(|i| frame(i) == 0.0), "Silent right after the release");
    }

    #[test]
    fn suspend_outputs_silence_and_freezes_clock() {
        let mut engine = AudioEngine::init(EngineConfig::default(), HostCapabilities::default()).unwrap();
        engine.start();
        engine.run(128);
        let before = engine.now();
        engine.suspend();
        let out = engine.run(256);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(engine.now(), before);
        engine.resume();
        engine.run(128);
        assert!(engine.now() > before);
    }

    #[test]
    fn teardown_silences_and_ignores_controls() {
        let (mut engine, _) = manual();
        engine.start();
        engine.teardown();
        assert_eq!(engine.voice_count(), 0);
        engine.start();
        engine.enable_voice(0);
        assert!(!engine.is_playing());
        let mut out = vec![1.0; 64];
        engine.process_block(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn export_leaves_live_engine_untouched() {
        let config = EngineConfig {
            sample_rate: 8000,
            seed: Some(9),
            ..EngineConfig::default()
        };
        let mut engine = AudioEngine::init(config, HostCapabilities::default()).unwrap();
        engine.start();
        engine.run(100);
        let now = engine.now();

        let wav = engine.export_to_file(0.5).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(wav.len(), 44 + 4000 * 4);
        assert_eq!(engine.now(), now);
        assert!(engine.is_playing());

        assert_eq!(engine.export_to_file(0.0), Err(ExportError::InvalidDuration(0.0)));
        assert!(matches!(engine.export_to_file(1e9), Err(ExportError::TooLong { .. })));

        let huge = EngineConfig {
            sample_rate: 384_000,
            ..EngineConfig::default()
        };
        let engine = AudioEngine::init(huge, HostCapabilities::default()).unwrap();
        assert!(matches!(engine.export_to_file(3000.0), Err(ExportError::TooLarge { .. })));
    }

    #[test]
    fn export_composition_validates_first() {
        let engine = AudioEngine::init(EngineConfig::default(), HostCapabilities::default()).unwrap();
        let err = engine.export_composition(&json!({ "tracks": {} })).unwrap_err();
        assert!(err.to_string().contains("voices"), "{err}");
    }
}

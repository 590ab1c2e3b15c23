//! Settings records exchanged with the control surface.
//!
//! Every record resolves its defaults at construction (`Default` + serde
//! `default`), so consumers never need fallback logic of their own.

use serde::{Deserialize, Serialize};

use crate::dsp::envelope::Adsr;
use crate::dsp::lfo::Waveform;
use crate::dsp::noise::KernelParams;
use crate::dsp::reverb::ReverbSize;
use crate::dsp::saturation::SaturationMode;

/// Shape of the pulse (amplitude modulation) LFO.
pub type PulseShape = Waveform;

// ── Voice ───────────────────────────────────────────────────

/// Per-voice settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceSettings {
    /// Noise color [0, 4].
    #[serde(alias = "alpha")]
    pub color: f64,
    /// Second color cross-faded in by `color_blend` [0, 4].
    pub secondary_color: f64,
    /// Blend toward `secondary_color` [0, 1].
    pub color_blend: f64,
    /// Voice gain [0, 1].
    pub volume: f64,
    /// Stereo position [-1, 1].
    pub pan: f64,
    pub attack: f64,
    pub decay: f64,
    /// Sustain level [0, 1].
    pub sustain: f64,
    pub release: f64,
    /// Seconds to hold the sustain before releasing; `None` holds until stopped.
    #[serde(alias = "duration")]
    pub hold_duration: Option<f64>,
    /// Restart the envelope after every release.
    #[serde(rename = "loop")]
    pub looping: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        VoiceSettings {
            color: 3.0,
            secondary_color: 3.0,
            color_blend: 0.0,
            volume: 0.8,
            pan: 0.0,
            attack: 0.5,
            decay: 0.0,
            sustain: 1.0,
            release: 0.5,
            hold_duration: None,
            looping: false,
        }
    }
}

impl VoiceSettings {
    /// Clamp every field into its documented range.
    pub fn sanitized(&self) -> Self {
        VoiceSettings {
            color: clamp_or(self.color, 0.0, 4.0, 3.0),
            secondary_color: clamp_or(self.secondary_color, 0.0, 4.0, 3.0),
            color_blend: clamp_or(self.color_blend, 0.0, 1.0, 0.0),
            volume: clamp_or(self.volume, 0.0, 1.0, 0.8),
            pan: clamp_or(self.pan, -1.0, 1.0, 0.0),
            attack: non_negative(self.attack),
            decay: non_negative(self.decay),
            sustain: clamp_or(self.sustain, 0.0, 1.0, 1.0),
            release: non_negative(self.release),
            hold_duration: self.hold_duration.filter(|h| h.is_finite()).map(non_negative),
            looping: self.looping,
        }
    }

    pub fn adsr(&self) -> Adsr {
        Adsr {
            attack: self.attack,
            decay: self.decay,
            sustain: self.sustain,
            release: self.release,
        }
    }

    /// Kernel inputs for this voice under the ambient `global` settings.
    ///
    /// A global blend, when active, overrides the voice's own second color.
    pub fn kernel_params(&self, global: &GlobalSettings) -> KernelParams {
        let (secondary, blend) = if global.color_blend > 0.0 {
            (global.color2, global.color_blend)
        } else {
            (self.secondary_color, self.color_blend)
        };
        KernelParams {
            color: self.color as f32,
            secondary_color: secondary as f32,
            color_blend: blend as f32,
            texture: global.texture as f32,
            bit_depth: global.bit_depth,
            sample_rate_reduction: global.sample_rate_reduction,
        }
        .clamped()
    }
}

// ── Global ──────────────────────────────────────────────────

/// Three parallel band-pass taps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResonantSettings {
    pub enabled: bool,
    /// Center frequencies in Hz.
    pub frequencies: Vec<f64>,
    pub q: f64,
    /// Wet amount [0, 1], split evenly across the three taps.
    pub mix: f64,
}

impl Default for ResonantSettings {
    fn default() -> Self {
        ResonantSettings {
            enabled: false,
            frequencies: vec![200.0, 400.0, 600.0],
            q: 10.0,
            mix: 0.5,
        }
    }
}

impl ResonantSettings {
    /// Center frequency for tap `i`, falling back to harmonics of 200 Hz.
    pub fn frequency(&self, i: usize) -> f64 {
        self.frequencies
            .get(i)
            .copied()
            .filter(|f| f.is_finite() && *f > 0.0)
            .unwrap_or(200.0 * (i + 1) as f64)
    }
}

/// Feedback comb tap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CombSettings {
    pub enabled: bool,
    /// Delay in seconds.
    pub delay: f64,
    pub feedback: f64,
    pub mix: f64,
}

impl Default for CombSettings {
    fn default() -> Self {
        CombSettings {
            enabled: false,
            delay: 0.005,
            feedback: 0.7,
            mix: 0.3,
        }
    }
}

/// Ambient settings shared by every voice and the effect chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    /// Perceptual ("grey") EQ on/off.
    pub grey: bool,
    /// Pulse rate in Hz [0, 4]; 0 disables the pulse.
    pub pulse: f64,
    pub pulse_shape: PulseShape,
    /// White source: < 0.5 Gaussian, >= 0.5 uniform.
    #[serde(alias = "dist")]
    pub texture: f64,
    /// Auto-pan rate in Hz [0, 2].
    pub pan_rate: f64,
    /// Auto-pan depth [0, 1].
    pub pan_depth: f64,
    /// Second color applied to every voice when `color_blend` > 0.
    #[serde(alias = "alpha2")]
    pub color2: f64,
    pub color_blend: f64,
    /// Saturation wet amount [0, 1].
    pub saturation: f64,
    pub saturation_mode: SaturationMode,
    /// Bit crusher depth [2, 16].
    pub bit_depth: u32,
    /// Sample-and-hold factor [1, 32].
    pub sample_rate_reduction: u32,
    /// Reverb wet amount [0, 1].
    pub reverb_mix: f64,
    pub reverb_size: ReverbSize,
    pub resonant: Option<ResonantSettings>,
    pub comb: Option<CombSettings>,
    /// Master output gain.
    pub master_volume: f64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        GlobalSettings {
            grey: false,
            pulse: 0.0,
            pulse_shape: PulseShape::Sine,
            texture: 0.0,
            pan_rate: 0.0,
            pan_depth: 0.0,
            color2: 3.0,
            color_blend: 0.0,
            saturation: 0.0,
            saturation_mode: SaturationMode::Soft,
            bit_depth: 16,
            sample_rate_reduction: 1,
            reverb_mix: 0.0,
            reverb_size: ReverbSize::Medium,
            resonant: None,
            comb: None,
            master_volume: 0.5,
        }
    }
}

impl GlobalSettings {
    /// Clamp every field into its documented range.
    pub fn sanitized(&self) -> Self {
        GlobalSettings {
            grey: self.grey,
            pulse: clamp_or(self.pulse, 0.0, 4.0, 0.0),
            pulse_shape: self.pulse_shape,
            texture: clamp_or(self.texture, 0.0, 1.0, 0.0),
            pan_rate: clamp_or(self.pan_rate, 0.0, 2.0, 0.0),
            pan_depth: clamp_or(self.pan_depth, 0.0, 1.0, 0.0),
            color2: clamp_or(self.color2, 0.0, 4.0, 3.0),
            color_blend: clamp_or(self.color_blend, 0.0, 1.0, 0.0),
            saturation: clamp_or(self.saturation, 0.0, 1.0, 0.0),
            saturation_mode: self.saturation_mode,
            bit_depth: self.bit_depth.clamp(2, 16),
            sample_rate_reduction: self.sample_rate_reduction.clamp(1, 32),
            reverb_mix: clamp_or(self.reverb_mix, 0.0, 1.0, 0.0),
            reverb_size: self.reverb_size,
            resonant: self.resonant.clone().map(|r| ResonantSettings {
                q: clamp_or(r.q, 0.0001, 1000.0, 10.0),
                mix: clamp_or(r.mix, 0.0, 1.0, 0.5),
                ..r
            }),
            comb: self.comb.clone().map(|c| CombSettings {
                delay: clamp_or(c.delay, 0.0, 0.1, 0.005),
                feedback: clamp_or(c.feedback, 0.0, 0.99, 0.7),
                mix: clamp_or(c.mix, 0.0, 1.0, 0.3),
                ..c
            }),
            master_volume: clamp_or(self.master_volume, 0.0, 1.0, 0.5),
        }
    }
}

/// A partial update to [`GlobalSettings`]; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grey: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_shape: Option<PulseShape>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texture: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan_depth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_blend: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturation_mode: Option<SaturationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate_reduction: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverb_mix: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverb_size: Option<ReverbSize>,
}

impl GlobalChanges {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        *self == GlobalChanges::default()
    }

    /// Overwrite the fields present in `self`.
    pub fn merge_into(&self, settings: &mut GlobalSettings) {
        fn put<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        put(&mut settings.grey, &self.grey);
        put(&mut settings.pulse, &self.pulse);
        put(&mut settings.pulse_shape, &self.pulse_shape);
        put(&mut settings.texture, &self.texture);
        put(&mut settings.pan_rate, &self.pan_rate);
        put(&mut settings.pan_depth, &self.pan_depth);
        put(&mut settings.color2, &self.color2);
        put(&mut settings.color_blend, &self.color_blend);
        put(&mut settings.saturation, &self.saturation);
        put(&mut settings.saturation_mode, &self.saturation_mode);
        put(&mut settings.bit_depth, &self.bit_depth);
        put(&mut settings.sample_rate_reduction, &self.sample_rate_reduction);
        put(&mut settings.reverb_mix, &self.reverb_mix);
        put(&mut settings.reverb_size, &self.reverb_size);
    }
}

// ── Preset ──────────────────────────────────────────────────

/// One voice entry of a multi-voice preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePreset {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: VoiceSettings,
}

/// A stored settings record: ambient settings plus either single-voice
/// fields or an explicit per-voice list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub global: GlobalSettings,
    #[serde(default, alias = "alpha", skip_serializing_if = "Option::is_none")]
    pub color: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sustain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voices: Option<Vec<VoicePreset>>,
}

impl Preset {
    /// Voice 0 settings for a single-voice preset.
    pub fn single_voice(&self) -> VoiceSettings {
        let base = VoiceSettings::default();
        VoiceSettings {
            color: self.color.unwrap_or(base.color),
            attack: self.attack.unwrap_or(base.attack),
            decay: self.decay.unwrap_or(base.decay),
            sustain: self.sustain.unwrap_or(base.sustain),
            release: self.release.unwrap_or(base.release),
            hold_duration: self.duration,
            looping: self.looping,
            volume: 0.8,
            pan: 0.0,
            ..base
        }
    }
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_defaults_fill_missing_fields() {
        let v: VoiceSettings = serde_json::from_str(r#"{ "color": 1.5, "loop": true }"#).unwrap();
        assert_eq!(v.color, 1.5);
        assert!(v.looping);
        assert_eq!(v.volume, 0.8);
        assert_eq!(v.hold_duration, None);
    }

    #[test]
    fn voice_accepts_legacy_names() {
        let v: VoiceSettings = serde_json::from_str(r#"{ "alpha": 2, "duration": 4 }"#).unwrap();
        assert_eq!(v.color, 2.0);
        assert_eq!(v.hold_duration, Some(4.0));
    }

    #[test]
    fn sanitize_clamps_ranges() {
        let v = VoiceSettings {
            color: 9.0,
            pan: -3.0,
            attack: -1.0,
            sustain: f64::NAN,
            ..VoiceSettings::default()
        }
        .sanitized();
        assert_eq!(v.color, 4.0);
        assert_eq!(v.pan, -1.0);
        assert_eq!(v.attack, 0.0);
        assert_eq!(v.sustain, 1.0);
    }

    #[test]
    fn global_blend_overrides_voice_blend() {
        let voice = VoiceSettings {
            secondary_color: 0.0,
            color_blend: 0.25,
            ..VoiceSettings::default()
        };
        let mut global = GlobalSettings::default();
        assert_eq!(voice.kernel_params(&global).color_blend, 0.25);

        global.color2 = 4.0;
        global.color_blend = 0.5;
        let p = voice.kernel_params(&global);
        assert_eq!(p.secondary_color, 4.0);
        assert_eq!(p.color_blend, 0.5);
    }

    #[test]
    fn changes_merge_only_present_fields() {
        let mut g = GlobalSettings::default();
        let changes = GlobalChanges {
            pulse: Some(1.5),
            bit_depth: Some(8),
            ..GlobalChanges::default()
        };
        assert!(!changes.is_empty());
        changes.merge_into(&mut g);
        assert_eq!(g.pulse, 1.5);
        assert_eq!(g.bit_depth, 8);
        assert_eq!(g.reverb_mix, 0.0);
        assert!(GlobalChanges::default().is_empty());
    }

    #[test]
    fn preset_parses_single_voice_form() {
        let p: Preset = serde_json::from_str(
            r#"{ "name": "Deep Sleep", "category": "sleep", "color": 3.95, "pulse": 0.12,
                 "pulseShape": "sine", "grey": false, "dist": 0, "binaural": true,
                 "attack": 30, "loop": false }"#,
        )
        .unwrap();
        assert_eq!(p.name.as_deref(), Some("Deep Sleep"));
        assert_eq!(p.global.pulse, 0.12);
        let v = p.single_voice();
        assert_eq!(v.color, 3.95);
        assert_eq!(v.attack, 30.0);
        assert_eq!(v.hold_duration, None);
        assert!(p.voices.is_none());
    }

    #[test]
    fn preset_parses_voice_list() {
        let p: Preset = serde_json::from_str(
            r#"{ "reverbMix": 0.4, "reverbSize": "large",
                 "voices": [ { "color": 4 }, { "enabled": true, "color": 1, "pan": -0.5 } ] }"#,
        )
        .unwrap();
        assert_eq!(p.global.reverb_size, ReverbSize::Large);
        let voices = p.voices.unwrap();
        assert_eq!(voices.len(), 2);
        assert!(voices[1].enabled);
        assert_eq!(voices[1].settings.pan, -0.5);
    }
}

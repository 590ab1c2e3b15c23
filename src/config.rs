//! Engine configuration and host capability description.

use serde::{Deserialize, Serialize};

use crate::error::InitError;

/// Tunables for one [`AudioEngine`](crate::engine::AudioEngine) instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per `process_block` call in `run`.
    pub block_size: usize,
    /// Voices kept alive outside compositions.
    pub interactive_voices: usize,
    /// Maximum voices a composition may allocate.
    pub composition_voice_ceiling: usize,
    /// Parameter smoothing time constant in seconds.
    pub smoothing_time_constant: f64,
    /// Gap between the end of a release and the next loop restart.
    pub loop_guard: f64,
    /// Delay added before a live composition's first event.
    pub scheduling_lead: f64,
    /// Slack after a composition's last event before voices are pruned.
    pub end_epsilon: f64,
    /// Release used by `stop` when the caller passes none.
    pub default_stop_release: f64,
    /// Upper bound on a single offline render.
    pub max_render_seconds: f64,
    /// Upper bound on flattened events per composition.
    pub max_timeline_events: usize,
    /// Fixed PRNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44100,
            channels: 2,
            block_size: 128,
            interactive_voices: 4,
            composition_voice_ceiling: 32,
            smoothing_time_constant: 0.15,
            loop_guard: 0.05,
            scheduling_lead: 0.1,
            end_epsilon: 0.05,
            default_stop_release: 0.1,
            max_render_seconds: 3600.0,
            max_timeline_events: 100_000,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.sample_rate < 8000 || self.sample_rate > 384_000 {
            return Err(InitError::InvalidConfig(format!(
                "sample rate {} outside 8000..=384000",
                self.sample_rate
            )));
        }
        if self.channels != 2 {
            return Err(InitError::InvalidConfig(format!(
                "{} channels requested, only stereo is supported",
                self.channels
            )));
        }
        if self.block_size == 0 {
            return Err(InitError::InvalidConfig("block size must be positive".into()));
        }
        if self.interactive_voices == 0 {
            return Err(InitError::InvalidConfig(
                "at least one interactive voice is required".into(),
            ));
        }
        if self.composition_voice_ceiling < self.interactive_voices {
            return Err(InitError::InvalidConfig(format!(
                "composition ceiling {} below interactive voice count {}",
                self.composition_voice_ceiling, self.interactive_voices
            )));
        }
        let times = [
            ("loop guard", self.loop_guard),
            ("scheduling lead", self.scheduling_lead),
            ("end epsilon", self.end_epsilon),
            ("default stop release", self.default_stop_release),
            ("smoothing time constant", self.smoothing_time_constant),
        ];
        for (name, value) in times {
            if !value.is_finite() || value < 0.0 {
                return Err(InitError::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if !self.max_render_seconds.is_finite() || self.max_render_seconds <= 0.0 {
            return Err(InitError::InvalidConfig(
                "max render seconds must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Seed for an independent stream `stream` derived from the configured seed.
    pub(crate) fn stream_seed(&self, stream: u64) -> Option<u64> {
        self.seed
            .map(|s| s.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
    }
}

/// Processing primitives offered by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostCapabilities {
    pub noise_generator: bool,
    pub stereo_panner: bool,
    pub offline_rendering: bool,
    pub biquad_filter: bool,
    pub wave_shaper: bool,
    pub delay_line: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        HostCapabilities {
            noise_generator: true,
            stereo_panner: true,
            offline_rendering: true,
            biquad_filter: true,
            wave_shaper: true,
            delay_line: true,
        }
    }
}

impl HostCapabilities {
    /// Fail with the first missing required capability.
    pub fn check_required(&self) -> Result<(), InitError> {
        let required = [
            ("noise generator", self.noise_generator),
            ("stereo panner", self.stereo_panner),
            ("offline rendering", self.offline_rendering),
        ];
        match required.iter().find(|(_, present)| !present) {
            Some((name, _)) => Err(InitError::MissingCapability(name)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_mono_and_bad_times() {
        let mono = EngineConfig {
            channels: 1,
            ..EngineConfig::default()
        };
        assert!(mono.validate().is_err());

        let negative = EngineConfig {
            loop_guard: -0.1,
            ..EngineConfig::default()
        };
        let err = negative.validate().unwrap_err().to_string();
        assert!(err.contains("loop guard"), "Error should name the field: {err}");
    }

    #[test]
    fn config_parses_partial_json() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{ "sampleRate": 48000, "seed": 7 }"#).unwrap();
        assert_eq!(cfg.sample_rate, 48000);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.loop_guard, 0.05);
    }

    #[test]
    fn missing_required_capability_is_named() {
        let caps = HostCapabilities {
            stereo_panner: false,
            ..HostCapabilities::default()
        };
        match caps.check_required() {
            Err(InitError::MissingCapability(name)) => assert_eq!(name, "stereo panner"),
            other => panic!("Expected missing panner, got {other:?}"),
        }
        let optional_missing = HostCapabilities {
            wave_shaper: false,
            ..HostCapabilities::default()
        };
        assert!(optional_missing.check_required().is_ok());
    }

    #[test]
    fn stream_seeds_differ() {
        let cfg = EngineConfig {
            seed: Some(1),
            ..EngineConfig::default()
        };
        assert_ne!(cfg.stream_seed(0), cfg.stream_seed(1));
        assert_eq!(EngineConfig::default().stream_seed(3), None);
    }
}

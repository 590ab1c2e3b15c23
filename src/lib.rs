pub mod clock;
pub mod compiler;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod settings;

use crate::compiler::{Composition, Timeline};
use crate::config::{EngineConfig, HostCapabilities};
use crate::engine::AudioEngine;
use crate::error::NoiseError;
use crate::settings::{GlobalSettings, Preset};
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the colored-noise-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Validate and flatten a composition document given as JSON text.
pub fn compile(source: &str) -> Result<Timeline, NoiseError> {
    let config = EngineConfig::default();
    Ok(Composition::from_json(source, config.max_timeline_events)?.flatten())
}

/// Compile and render a composition document to WAV bytes.
pub fn render(source: &str, initial: &GlobalSettings, config: &EngineConfig) -> Result<Vec<u8>, NoiseError> {
    config.validate()?;
    let timeline = Composition::from_json(source, config.max_timeline_events)?.flatten();
    Ok(dsp::renderer::render_wav(&timeline, initial, config, &HostCapabilities::default())?)
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn config_at(sample_rate: u32) -> EngineConfig {
    EngineConfig {
        sample_rate,
        ..EngineConfig::default()
    }
}

/// WASM-exposed: check a composition document, reporting the first error.
#[wasm_bindgen]
pub fn validate_composition(source: &str) -> Result<(), JsValue> {
    compile(source).map(|_| ()).map_err(js_error)
}

/// WASM-exposed: compile a composition document into its flat timeline.
#[wasm_bindgen]
pub fn compile_composition(source: &str) -> Result<JsValue, JsValue> {
    let timeline = compile(source).map_err(js_error)?;
    serde_wasm_bindgen::to_value(&timeline).map_err(js_error)
}

/// WASM-exposed: render a composition document to a WAV byte array.
#[wasm_bindgen]
pub fn render_composition_wav(source: &str, sample_rate: u32) -> Result<Vec<u8>, JsValue> {
    render(source, &GlobalSettings::default(), &config_at(sample_rate)).map_err(js_error)
}

/// WASM-exposed: render `seconds` of a stored preset to a WAV byte array.
#[wasm_bindgen]
pub fn render_settings_wav(preset_json: &str, seconds: f64, sample_rate: u32) -> Result<Vec<u8>, JsValue> {
    let preset: Preset = serde_json::from_str(preset_json).map_err(js_error)?;
    let mut engine = AudioEngine::init(config_at(sample_rate), HostCapabilities::default()).map_err(js_error)?;
    engine.apply_preset(&preset, true);
    engine.export_to_file(seconds).map_err(js_error)
}

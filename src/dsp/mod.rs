//! DSP — Pure Rust noise synthesis and effect processing.
//!
//! All DSP runs in Rust for deterministic, cross-platform audio output.
//! The same code powers live playback (`AudioEngine::process_block`) and
//! offline WAV export.

pub mod analysis;
pub mod delay;
pub mod envelope;
pub mod filter;
pub mod graph;
pub mod lfo;
pub mod mixer;
pub mod noise;
pub mod param;
pub mod renderer;
pub mod reverb;
pub mod saturation;
pub mod voice;

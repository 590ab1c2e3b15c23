//! Offline renderer: a flattened composition to a fixed-length stereo buffer
//! and WAV bytes.
//!
//! Each note gets its own voice chain on a fresh graph. Blocks are split at
//! every note start and global change so both land on their exact sample.

use log::{debug, warn};

use crate::compiler::{NoteEvent, Timeline};
use crate::config::{EngineConfig, HostCapabilities};
use crate::error::ExportError;
use crate::settings::{GlobalChanges, GlobalSettings};

use super::envelope::Envelope;
use super::graph::SignalRoutingGraph;
use super::mixer::Mixer;
use super::voice::VoiceChain;

/// Seed stream offset for per-note chains, clear of the live voice streams.
const NOTE_SEED_BASE: u64 = 1 << 20;

/// Program the envelope for one composition note starting at `at`.
///
/// The hold ends `duration` seconds after the sustain starts; a zero hold
/// sustains until the voice is restarted or stopped.
pub fn schedule_note(envelope: &mut Envelope, note: &NoteEvent, at: f64) {
    let settings = note.voice_settings();
    let sustain_start = envelope.start(&settings.adsr(), at);
    if note.duration > 0.0 {
        envelope.release(note.release, sustain_start + note.duration);
    }
}

/// Largest 16-bit stereo data chunk a WAV header can describe.
const MAX_WAV_DATA_BYTES: u64 = u32::MAX as u64 - 36;

struct NoteJob<'a> {
    /// Index into `Timeline::tracks`.
    track: usize,
    start: usize,
    /// First frame at or after the next note on the same track (or the buffer end).
    end: usize,
    time: f64,
    note: &'a NoteEvent,
}

/// Reject renders whose 16-bit stereo data would overflow the WAV size fields.
pub fn check_wav_size(frames: usize) -> Result<(), ExportError> {
    let bytes = frames as u64 * 4;
    if bytes > MAX_WAV_DATA_BYTES {
        return Err(ExportError::TooLarge { bytes });
    }
    Ok(())
}

fn frame_count(timeline: &Timeline, config: &EngineConfig) -> usize {
    (timeline.total_duration * config.sample_rate as f64).ceil() as usize
}

/// One job per note of every track under the voice ceiling, ordered by start frame.
///
/// A note owns its chain from the frame nearest its start until the first
/// frame at or after the next note on its track.
fn note_jobs<'a>(timeline: &'a Timeline, config: &EngineConfig, total_frames: usize) -> Vec<NoteJob<'a>> {
    let sr = config.sample_rate as f64;
    let start_of = |t: f64| ((t * sr).round() as usize).min(total_frames);
    let end_of = |t: f64| ((t * sr).ceil() as usize).min(total_frames);

    let mut jobs: Vec<NoteJob> = Vec::with_capacity(timeline.note_count());
    for (track_index, track) in timeline.tracks.iter().enumerate() {
        if track.voice >= config.composition_voice_ceiling {
            warn!(
                "Track '{}' exceeds the voice ceiling of {}; dropped from the render",
                track.name, config.composition_voice_ceiling
            );
            continue;
        }
        for (k, event) in track.events.iter().enumerate() {
            let end = track
                .events
                .get(k + 1)
                .map_or(total_frames, |next| end_of(next.time));
            jobs.push(NoteJob {
                track: track_index,
                start: start_of(event.time),
                end,
                time: event.time,
                note: &event.note,
            });
        }
    }
    jobs.sort_by_key(|j| j.start);
    jobs
}

/// Per-track envelope gain at every frame of the offline render.
///
/// Uses the same note plan as [`render_timeline`], so it is what each
/// track's chains are multiplied by before volume and pan.
pub fn envelope_frames(timeline: &Timeline, config: &EngineConfig) -> Vec<Vec<f64>> {
    let sr = config.sample_rate as f64;
    let frames = frame_count(timeline, config);
    let mut gains = vec![vec![0.0; frames]; timeline.tracks.len()];
    for job in note_jobs(timeline, config, frames) {
        let mut envelope = Envelope::new();
        schedule_note(&mut envelope, job.note, job.time);
        for f in job.start..job.end {
            gains[job.track][f] += envelope.value_at(f as f64 / sr);
        }
    }
    gains
}

/// Render `timeline` to interleaved stereo samples, starting from `initial`
/// ambient settings.
pub fn render_timeline(
    timeline: &Timeline,
    initial: &GlobalSettings,
    config: &EngineConfig,
    caps: &HostCapabilities,
) -> Result<Vec<f32>, ExportError> {
    if !caps.offline_rendering {
        return Err(ExportError::Unsupported("offline rendering"));
    }
    let seconds = timeline.total_duration;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ExportError::InvalidDuration(seconds));
    }
    if seconds > config.max_render_seconds {
        return Err(ExportError::TooLong {
            seconds,
            limit: config.max_render_seconds,
        });
    }

    let sr = config.sample_rate as f64;
    let total_frames = frame_count(timeline, config);
    check_wav_size(total_frames)?;
    let frame_of = |t: f64| ((t * sr).round() as usize).min(total_frames);
    let jobs = note_jobs(timeline, config, total_frames);

    let globals: Vec<(usize, &GlobalChanges)> = timeline
        .global
        .iter()
        .map(|g| (frame_of(g.time), &g.changes))
        .collect();

    debug!(
        "Offline render: {} notes, {} global changes, {total_frames} frames",
        jobs.len(),
        globals.len()
    );

    let tc = config.smoothing_time_constant;
    let mut global = initial.sanitized();
    let mut graph = SignalRoutingGraph::new(sr, tc, &global, caps);
    let mut mixer = Mixer::new();
    let mut active: Vec<(VoiceChain, &NoteJob, usize)> = Vec::new();
    let mut output = Vec::with_capacity(total_frames * 2);

    let mut next_job = 0;
    let mut next_global = 0;
    let mut frame = 0;
    let mut ordinal = 0u64;

    while frame < total_frames {
        while next_global < globals.len() && globals[next_global].0 <= frame {
            globals[next_global].1.merge_into(&mut global);
            global = global.sanitized();
            graph.apply(&global, true);
            for (chain, job, _) in active.iter_mut() {
                let settings = job.note.voice_settings();
                chain.configure(
                    settings.kernel_params(&global),
                    settings.volume as f32,
                    settings.pan as f32,
                    true,
                );
            }
            next_global += 1;
        }

        while next_job < jobs.len() && jobs[next_job].start <= frame {
            let job = &jobs[next_job];
            let settings = job.note.voice_settings();
            let seed = config.stream_seed(NOTE_SEED_BASE + ordinal);
            let mut chain = VoiceChain::new(sr, tc, seed);
            chain.configure(
                settings.kernel_params(&global),
                settings.volume as f32,
                settings.pan as f32,
                true,
            );
            schedule_note(&mut chain.envelope, job.note, job.time);
            active.push((chain, job, job.end));
            next_job += 1;
            ordinal += 1;
        }

        let mut block_end = (frame + config.block_size).min(total_frames);
        if let Some(job) = jobs.get(next_job) {
            block_end = block_end.min(job.start);
        }
        if let Some((at, _)) = globals.get(next_global) {
            block_end = block_end.min(*at);
        }
        let frames = block_end - frame;

        active.retain(|(_, _, end)| *end > frame);
        mixer.clear(frames);
        for (chain, _, end) in active.iter_mut() {
            let live = (*end).min(block_end) - frame;
            for i in 0..live {
                let (l, r) = chain.next_frame((frame + i) as f64 / sr);
                mixer.add(i, l, r);
            }
        }

        graph.begin_block(frames);
        for i in 0..frames {
            let (l, r) = mixer.frame(i);
            let (l, r) = graph.process_frame(l, r);
            output.push(l);
            output.push(r);
        }
        frame = block_end;
    }

    Ok(output)
}

/// Convert float samples to 16-bit PCM.
pub fn to_pcm_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s as f64 * 32767.0).round().clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Render `timeline` to a 16-bit stereo WAV file as bytes.
pub fn render_wav(
    timeline: &Timeline,
    initial: &GlobalSettings,
    config: &EngineConfig,
    caps: &HostCapabilities,
) -> Result<Vec<u8>, ExportError> {
    let samples = render_timeline(timeline, initial, config, caps)?;
    Ok(encode_wav(&to_pcm_i16(&samples), config.sample_rate, 2))
}

/// Encode interleaved i16 PCM samples to a WAV byte buffer.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

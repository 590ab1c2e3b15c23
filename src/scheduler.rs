//! Deferred control actions and live composition dispatch.
//!
//! Every time-based transition of the engine is a [`TimerAction`] in one
//! [`TimerQueue`]. A live composition run is nothing more than a batch of
//! such actions scheduled relative to the run's origin.

use std::fmt;

use log::{debug, info, warn};

use crate::clock::TimerQueue;
use crate::compiler::{NoteEvent, Timeline};
use crate::config::EngineConfig;
use crate::settings::GlobalChanges;

/// A deferred control action.
pub enum TimerAction {
    /// End the hold stage of a voice.
    Release { voice: usize },
    /// Restart a looping voice after its release.
    LoopRestart { voice: usize },
    /// Mark a released, non-looping voice as no longer playing.
    MarkIdle { voice: usize },
    /// Notify the caller of `stop` that the release has finished.
    StopComplete(Box<dyn FnOnce()>),
    CompositionNote { run: u64, voice: usize, note: NoteEvent },
    CompositionGlobal { run: u64, changes: GlobalChanges },
    CompositionEnd { run: u64 },
}

impl TimerAction {
    /// The voice whose envelope lifecycle this action belongs to.
    pub fn lifecycle_voice(&self) -> Option<usize> {
        match self {
            TimerAction::Release { voice }
            | TimerAction::LoopRestart { voice }
            | TimerAction::MarkIdle { voice } => Some(*voice),
            _ => None,
        }
    }

    /// The composition run this action belongs to.
    pub fn run(&self) -> Option<u64> {
        match self {
            TimerAction::CompositionNote { run, .. }
            | TimerAction::CompositionGlobal { run, .. }
            | TimerAction::CompositionEnd { run } => Some(*run),
            _ => None,
        }
    }
}

impl fmt::Debug for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerAction::Release { voice } => write!(f, "Release({voice})"),
            TimerAction::LoopRestart { voice } => write!(f, "LoopRestart({voice})"),
            TimerAction::MarkIdle { voice } => write!(f, "MarkIdle({voice})"),
            TimerAction::StopComplete(_) => write!(f, "StopComplete"),
            TimerAction::CompositionNote { run, voice, .. } => write!(f, "Note(run {run}, voice {voice})"),
            TimerAction::CompositionGlobal { run, .. } => write!(f, "Global(run {run})"),
            TimerAction::CompositionEnd { run } => write!(f, "End(run {run})"),
        }
    }
}

/// Handle describing a dispatched composition run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionRun {
    id: u64,
    origin: f64,
    total_duration: f64,
    scheduled_notes: usize,
    dropped_tracks: usize,
}

impl CompositionRun {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Clock time corresponding to timeline time zero.
    pub fn origin(&self) -> f64 {
        self.origin
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    /// Clock time at which the run stops its voices.
    pub fn end_time(&self, config: &EngineConfig) -> f64 {
        self.origin + self.total_duration + config.end_epsilon
    }

    pub fn scheduled_notes(&self) -> usize {
        self.scheduled_notes
    }

    /// Tracks that did not fit under the voice ceiling.
    pub fn dropped_tracks(&self) -> usize {
        self.dropped_tracks
    }
}

/// Cancel every pending action of earlier runs. Returns how many were removed.
pub fn cancel_runs(timers: &mut TimerQueue<TimerAction>) -> usize {
    timers.cancel_matching(|a| a.run().is_some())
}

/// Schedule `timeline` as run `id`, starting `config.scheduling_lead` after `now`.
pub fn dispatch(
    timers: &mut TimerQueue<TimerAction>,
    timeline: &Timeline,
    id: u64,
    now: f64,
    config: &EngineConfig,
) -> CompositionRun {
    let cancelled = cancel_runs(timers);
    if cancelled > 0 {
        debug!("Cancelled {cancelled} pending actions of the previous composition run");
    }

    let origin = now + config.scheduling_lead;
    let mut scheduled_notes = 0;
    let mut dropped_tracks = 0;

    for track in &timeline.tracks {
        if track.voice >= config.composition_voice_ceiling {
            warn!(
                "Track '{}' needs voice {} but the ceiling is {}; its {} events are dropped",
                track.name,
                track.voice,
                config.composition_voice_ceiling,
                track.events.len()
            );
            dropped_tracks += 1;
            continue;
        }
        for event in &track.events {
            timers.schedule(
                origin + event.time,
                TimerAction::CompositionNote {
                    run: id,
                    voice: track.voice,
                    note: event.note.clone(),
                },
            );
            scheduled_notes += 1;
        }
    }

    for change in &timeline.global {
        timers.schedule(
            origin + change.time,
            TimerAction::CompositionGlobal {
                run: id,
                changes: change.changes.clone(),
            },
        );
    }

    let run = CompositionRun {
        id,
        origin,
        total_duration: timeline.total_duration,
        scheduled_notes,
        dropped_tracks,
    };
    timers.schedule(run.end_time(config), TimerAction::CompositionEnd { run: id });

    info!(
        "Composition run {id}: {scheduled_notes} notes, {} global changes, {:.2}s",
        timeline.global.len(),
        timeline.total_duration
    );
    run
}

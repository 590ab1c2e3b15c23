//! Composition compiler: validates a composition document and flattens its
//! nested event lists into an absolute-time [`Timeline`].
//!
//! A document maps track names to event lists, plus an optional global list:
//!
//! ```json
//! {
//!   "voices": {
//!     "bass": [ { "color": 4, "duration": 3, "attack": 2 }, { "wait": 2 },
//!               { "repeat": 2, "events": [ { "color": 3.5, "duration": 1 } ] } ]
//!   },
//!   "global": [ { "wait": 4, "reverbMix": 0.4 } ]
//! }
//! ```
//!
//! Validation runs to completion before anything is dispatched, and stops at
//! the first violation with its location.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Location, ValidationError, ValidationErrorKind};
use crate::settings::{GlobalChanges, VoiceSettings};

// ── Document ────────────────────────────────────────────────

/// A single sounding event on a track.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub color: f64,
    pub volume: f64,
    pub pan: f64,
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
    /// Sustain hold time in seconds.
    pub duration: f64,
}

impl NoteEvent {
    /// Time the note occupies on its track: attack + decay + hold + release.
    pub fn span(&self) -> f64 {
        self.attack + self.decay + self.duration + self.release
    }

    /// Voice settings that play this note once.
    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            color: self.color,
            volume: self.volume,
            pan: self.pan,
            attack: self.attack,
            decay: self.decay,
            sustain: self.sustain,
            release: self.release,
            hold_duration: Some(self.duration),
            looping: false,
            ..VoiceSettings::default()
        }
    }
}

/// One entry of an event list.
#[derive(Debug, Clone, PartialEq)]
pub enum Item<T> {
    Event(T),
    Wait(f64),
    Repeat { count: u32, events: Vec<Item<T>> },
}

pub type EventList = Vec<Item<NoteEvent>>;
pub type GlobalEventList = Vec<Item<GlobalChanges>>;

/// A validated composition document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Composition {
    /// Tracks ordered by name.
    pub tracks: Vec<(String, EventList)>,
    pub global: GlobalEventList,
}

impl Composition {
    /// Validate a parsed document.
    pub fn from_value(doc: &Value, max_events: usize) -> Result<Self, ValidationError> {
        let root = doc
            .as_object()
            .ok_or_else(|| ValidationError::new(Location::Document, ValidationErrorKind::NotAnObject))?;

        let voices = match root.get("voices") {
            Some(Value::Object(voices)) => voices,
            Some(other) => {
                return Err(ValidationError::new(
                    Location::Document,
                    ValidationErrorKind::InvalidValue {
                        field: "voices",
                        value: other.to_string(),
                    },
                ));
            }
            None => {
                return Err(ValidationError::new(
                    Location::Document,
                    ValidationErrorKind::MissingField("voices"),
                ));
            }
        };

        let mut names: Vec<&String> = voices.keys().collect();
        names.sort();

        let mut tracks = Vec::with_capacity(names.len());
        for name in names {
            let mut ctx = ValidateCtx::track(name);
            let events = ctx.list(&voices[name], &mut ValidateCtx::note)?;
            tracks.push((name.clone(), events));
        }

        let global = match root.get("global") {
            None | Some(Value::Null) => Vec::new(),
            Some(list) => ValidateCtx::global().list(list, &mut ValidateCtx::changes)?,
        };

        let composition = Composition { tracks, global };
        let expanded = composition
            .tracks
            .iter()
            .map(|(_, events)| expanded_len(events))
            .fold(expanded_len(&composition.global), usize::saturating_add);
        if expanded > max_events {
            return Err(ValidationError::new(
                Location::Document,
                ValidationErrorKind::TooManyEvents { limit: max_events },
            ));
        }
        Ok(composition)
    }

    /// Parse and validate JSON text.
    pub fn from_json(text: &str, max_events: usize) -> Result<Self, ValidationError> {
        let doc: Value = serde_json::from_str(text).map_err(|e| {
            ValidationError::new(Location::Document, ValidationErrorKind::MalformedJson(e.to_string()))
        })?;
        Self::from_value(&doc, max_events)
    }

    /// Flatten into absolute time. Track `i` plays on voice `i`.
    pub fn flatten(&self) -> Timeline {
        let tracks: Vec<TrackTimeline> = self
            .tracks
            .iter()
            .enumerate()
            .map(|(voice, (name, events))| {
                let mut cursor = Cursor::default();
                cursor.walk(events, &NoteEvent::span);
                TrackTimeline {
                    name: name.clone(),
                    voice,
                    events: cursor
                        .emitted
                        .into_iter()
                        .map(|(time, note)| TimedNote { time, note })
                        .collect(),
                    end: cursor.time,
                }
            })
            .collect();

        let mut cursor = Cursor::default();
        cursor.walk(&self.global, &|_: &GlobalChanges| 0.0);
        let global_end = cursor.time;
        let global = cursor
            .emitted
            .into_iter()
            .filter(|(_, changes)| !changes.is_empty())
            .map(|(time, changes)| TimedGlobal { time, changes })
            .collect();

        let total_duration = tracks.iter().map(|t| t.end).fold(global_end, f64::max);

        Timeline {
            tracks,
            global,
            total_duration,
        }
    }
}

fn expanded_len<T>(items: &[Item<T>]) -> usize {
    items
        .iter()
        .map(|item| match item {
            Item::Event(_) | Item::Wait(_) => 1,
            Item::Repeat { count, events } => expanded_len(events).saturating_mul(*count as usize),
        })
        .fold(0, usize::saturating_add)
}

// ── Timeline ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedNote {
    /// Seconds from the start of the run.
    pub time: f64,
    pub note: NoteEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackTimeline {
    pub name: String,
    pub voice: usize,
    pub events: Vec<TimedNote>,
    /// Cursor position after the last entry.
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedGlobal {
    pub time: f64,
    pub changes: GlobalChanges,
}

/// Flattened composition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub tracks: Vec<TrackTimeline>,
    pub global: Vec<TimedGlobal>,
    /// Latest end time across all tracks, global included.
    pub total_duration: f64,
}

impl Timeline {
    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.events.len()).sum()
    }
}

/// Walks an event list accumulating time.
struct Cursor<T> {
    time: f64,
    emitted: Vec<(f64, T)>,
}

impl<T> Default for Cursor<T> {
    fn default() -> Self {
        Cursor {
            time: 0.0,
            emitted: Vec::new(),
        }
    }
}

impl<T: Clone> Cursor<T> {
    fn walk(&mut self, items: &[Item<T>], advance: &impl Fn(&T) -> f64) {
        for item in items {
            match item {
                Item::Event(event) => {
                    self.emitted.push((self.time, event.clone()));
                    self.time += advance(event);
                }
                Item::Wait(seconds) => self.time += seconds,
                Item::Repeat { count, events } => {
                    for _ in 0..*count {
                        self.walk(events, advance);
                    }
                }
            }
        }
    }
}

// ── Validation ──────────────────────────────────────────────

/// Validation state: where we are in the document.
struct ValidateCtx {
    track: Option<String>,
    path: Vec<usize>,
}

type Parsed<T> = Result<T, ValidationError>;

impl ValidateCtx {
    fn track(name: &str) -> Self {
        ValidateCtx {
            track: Some(name.to_string()),
            path: Vec::new(),
        }
    }

    fn global() -> Self {
        ValidateCtx {
            track: None,
            path: Vec::new(),
        }
    }

    fn err(&self, kind: ValidationErrorKind) -> ValidationError {
        let location = match &self.track {
            Some(name) => Location::Track {
                name: name.clone(),
                path: self.path.clone(),
            },
            None => Location::Global {
                path: self.path.clone(),
            },
        };
        ValidationError::new(location, kind)
    }

    /// Validate a list, expanding each entry with `event` for leaf objects.
    fn list<T>(
        &mut self,
        value: &Value,
        event: &mut impl FnMut(&Self, &Map<String, Value>) -> Parsed<Option<T>>,
    ) -> Parsed<Vec<Item<T>>> {
        let entries = value.as_array().ok_or_else(|| self.err(ValidationErrorKind::NotAList))?;
        let mut items = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            self.path.push(i);
            self.item(entry, event, &mut items)?;
            self.path.pop();
        }
        Ok(items)
    }

    fn item<T>(
        &mut self,
        entry: &Value,
        event: &mut impl FnMut(&Self, &Map<String, Value>) -> Parsed<Option<T>>,
        out: &mut Vec<Item<T>>,
    ) -> Parsed<()> {
        let obj = entry.as_object().ok_or_else(|| self.err(ValidationErrorKind::NotAnObject))?;

        if let Some(repeat) = obj.get("repeat") {
            let count = self.repeat_count(repeat)?;
            let events = obj
                .get("events")
                .ok_or_else(|| self.err(ValidationErrorKind::MissingField("events")))?;
            let events = self.list(events, event)?;
            if events.is_empty() {
                return Err(self.err(ValidationErrorKind::EmptyRepeat));
            }
            out.push(Item::Repeat { count, events });
            return Ok(());
        }

        let wait = self.number(obj, "wait", 0.0, f64::MAX)?;
        let parsed = event(self, obj)?;
        if wait.is_none() && parsed.is_none() {
            return Err(self.err(ValidationErrorKind::UnknownEvent));
        }
        if let Some(wait) = wait {
            out.push(Item::Wait(wait));
        }
        if let Some(parsed) = parsed {
            out.push(Item::Event(parsed));
        }
        Ok(())
    }

    fn repeat_count(&self, value: &Value) -> Parsed<u32> {
        let invalid = || self.err(ValidationErrorKind::InvalidRepeat(value.to_string()));
        let n = value.as_f64().ok_or_else(invalid)?;
        if n < 1.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
            return Err(invalid());
        }
        Ok(n as u32)
    }

    /// Optional numeric field within `[min, max]`.
    fn number(&self, obj: &Map<String, Value>, field: &'static str, min: f64, max: f64) -> Parsed<Option<f64>> {
        let Some(value) = obj.get(field) else {
            return Ok(None);
        };
        let n = value
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| self.err(ValidationErrorKind::NotANumber(field)))?;
        if n < min || n > max {
            return Err(self.err(ValidationErrorKind::OutOfRange { field, value: n, min, max }));
        }
        Ok(Some(n))
    }

    fn required(&self, obj: &Map<String, Value>, field: &'static str, min: f64, max: f64) -> Parsed<f64> {
        self.number(obj, field, min, max)?
            .ok_or_else(|| self.err(ValidationErrorKind::MissingField(field)))
    }

    fn integer(&self, obj: &Map<String, Value>, field: &'static str, min: u32, max: u32) -> Parsed<Option<u32>> {
        match self.number(obj, field, min as f64, max as f64)? {
            Some(n) if n.fract() != 0.0 => Err(self.err(ValidationErrorKind::InvalidValue {
                field,
                value: n.to_string(),
            })),
            Some(n) => Ok(Some(n as u32)),
            None => Ok(None),
        }
    }

    fn choice<E: serde::de::DeserializeOwned>(&self, obj: &Map<String, Value>, field: &'static str) -> Parsed<Option<E>> {
        let Some(value) = obj.get(field) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone()).map(Some).map_err(|_| {
            self.err(ValidationErrorKind::InvalidValue {
                field,
                value: value.to_string(),
            })
        })
    }

    /// A note, or `None` when the object carries no note fields.
    fn note(&self, obj: &Map<String, Value>) -> Parsed<Option<NoteEvent>> {
        if !obj.contains_key("color") && !obj.contains_key("duration") {
            return Ok(None);
        }
        let defaults = VoiceSettings::default();
        let non_negative = |field| self.number(obj, field, 0.0, f64::MAX);
        Ok(Some(NoteEvent {
            color: self.required(obj, "color", 0.0, 4.0)?,
            duration: self.required(obj, "duration", 0.0, f64::MAX)?,
            volume: self.number(obj, "volume", 0.0, 1.0)?.unwrap_or(defaults.volume),
            pan: self.number(obj, "pan", -1.0, 1.0)?.unwrap_or(defaults.pan),
            attack: non_negative("attack")?.unwrap_or(defaults.attack),
            decay: non_negative("decay")?.unwrap_or(defaults.decay),
            sustain: self.number(obj, "sustain", 0.0, 1.0)?.unwrap_or(defaults.sustain),
            release: non_negative("release")?.unwrap_or(defaults.release),
        }))
    }

    /// Global changes; always `Some`, possibly empty.
    fn changes(&self, obj: &Map<String, Value>) -> Parsed<Option<GlobalChanges>> {
        let grey = match obj.get("grey") {
            None => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(other) => {
                return Err(self.err(ValidationErrorKind::InvalidValue {
                    field: "grey",
                    value: other.to_string(),
                }));
            }
        };
        let changes = GlobalChanges {
            grey,
            pulse: self.number(obj, "pulse", 0.0, 4.0)?,
            pulse_shape: self.choice(obj, "pulseShape")?,
            texture: self.number(obj, "texture", 0.0, 1.0)?,
            pan_rate: self.number(obj, "panRate", 0.0, 2.0)?,
            pan_depth: self.number(obj, "panDepth", 0.0, 1.0)?,
            color2: self.number(obj, "color2", 0.0, 4.0)?,
            color_blend: self.number(obj, "colorBlend", 0.0, 1.0)?,
            saturation: self.number(obj, "saturation", 0.0, 1.0)?,
            saturation_mode: self.choice(obj, "saturationMode")?,
            bit_depth: self.integer(obj, "bitDepth", 2, 16)?,
            sample_rate_reduction: self.integer(obj, "sampleRateReduction", 1, 32)?,
            reverb_mix: self.number(obj, "reverbMix", 0.0, 1.0)?,
            reverb_size: self.choice(obj, "reverbSize")?,
        };
        if changes.is_empty() && obj.contains_key("wait") {
            return Ok(None);
        }
        Ok(Some(changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LIMIT: usize = 100_000;

    fn compile(doc: Value) -> Timeline {
        Composition::from_value(&doc, LIMIT).unwrap().flatten()
    }

    fn validation_error(doc: Value) -> ValidationError {
        Composition::from_value(&doc, LIMIT).unwrap_err()
    }

    #[test]
    fn test_notes_advance_by_full_span() {
        let tl = compile(json!({
            "voices": { "a": [
                { "color": 3, "attack": 1, "decay": 0.5, "duration": 2, "release": 0.5 },
                { "color": 4, "duration": 1 },
            ] }
        }));
        let times: Vec<f64> = tl.tracks[0].events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 4.0]);
        assert_eq!(tl.total_duration, 6.0, "4 + 0.5 + 1 + 0.5");
    }

    #[test]
    fn test_note_defaults() {
        let tl = compile(json!({ "voices": { "a": [ { "color": 1, "duration": 2 } ] } }));
        let note = &tl.tracks[0].events[0].note;
        assert_eq!(note.volume, 0.8);
        assert_eq!(note.pan, 0.0);
        assert_eq!(note.attack, 0.5);
        assert_eq!(note.decay, 0.0);
        assert_eq!(note.sustain, 1.0);
        assert_eq!(note.release, 0.5);
    }

    #[test]
    fn test_repeat_expands_sequentially() {
        let a = json!({ "color": 2, "attack": 0.5, "duration": 1, "release": 0.5 });
        let b = json!({ "wait": 1 });
        let pair = compile(json!({ "voices": { "t": [a, b] } }));
        let tripled = compile(json!({
            "voices": { "t": [ { "repeat": 3, "events": [a, b] } ] }
        }));

        let times: Vec<f64> = tripled.tracks[0].events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 3.0, 6.0]);
        assert_eq!(tripled.total_duration, 3.0 * pair.total_duration);
    }

    #[test]
    fn test_nested_repeat() {
        let tl = compile(json!({
            "voices": { "t": [
                { "repeat": 2, "events": [
                    { "color": 0, "duration": 0, "attack": 0, "release": 1 },
                    { "repeat": 2, "events": [ { "wait": 0.5 } ] },
                ] }
            ] }
        }));
        let times: Vec<f64> = tl.tracks[0].events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 2.0]);
        assert_eq!(tl.total_duration, 4.0);
    }

    #[test]
    fn test_leading_wait_on_note() {
        let tl = compile(json!({
            "voices": { "t": [ { "wait": 2, "color": 3, "duration": 1, "attack": 0, "release": 0 } ] }
        }));
        assert_eq!(tl.tracks[0].events[0].time, 2.0);
        assert_eq!(tl.total_duration, 3.0);
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let doc = json!({
            "voices": {
                "waves": [ { "repeat": 4, "events": [
                    { "color": 3.7, "attack": 2.1, "duration": 1.3, "release": 2.9 },
                    { "wait": 0.7 },
                ] } ],
                "air": [ { "color": 1.2, "duration": 5, "pan": -0.4 } ],
            },
            "global": [ { "wait": 3, "reverbMix": 0.4 }, { "pulse": 0.2, "pulseShape": "triangle" } ]
        });
        let first = serde_json::to_vec(&compile(doc.clone())).unwrap();
        let second = serde_json::to_vec(&compile(doc)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tracks_sorted_by_name() {
        let tl = compile(json!({
            "voices": {
                "zeta": [ { "color": 1, "duration": 1 } ],
                "alpha": [ { "color": 2, "duration": 1 } ],
            }
        }));
        assert_eq!(tl.tracks[0].name, "alpha");
        assert_eq!(tl.tracks[0].voice, 0);
        assert_eq!(tl.tracks[1].name, "zeta");
        assert_eq!(tl.tracks[1].voice, 1);
    }

    #[test]
    fn test_global_keeps_only_changes() {
        let tl = compile(json!({
            "voices": { "t": [ { "color": 1, "duration": 1, "attack": 0, "release": 0 } ] },
            "global": [
                { "wait": 2 },
                { "wait": 1, "saturation": 0.5, "saturationMode": "warm" },
                { "wait": 5 },
            ]
        }));
        assert_eq!(tl.global.len(), 1);
        assert_eq!(tl.global[0].time, 3.0);
        assert_eq!(tl.global[0].changes.saturation, Some(0.5));
        assert_eq!(tl.total_duration, 8.0, "Trailing global wait extends the run");
    }

    #[test]
    fn test_missing_voices() {
        let err = validation_error(json!({ "global": [] }));
        assert_eq!(err.location, Location::Document);
        assert_eq!(err.kind, ValidationErrorKind::MissingField("voices"));
        assert!(err.to_string().contains("voices"));
    }

    #[test]
    fn test_missing_duration_names_track_and_index() {
        let err = validation_error(json!({
            "voices": { "rain": [ { "wait": 1 }, { "color": 2 } ] }
        }));
        assert_eq!(
            err.location,
            Location::Track {
                name: "rain".into(),
                path: vec![1]
            }
        );
        assert_eq!(err.kind, ValidationErrorKind::MissingField("duration"));
    }

    #[test]
    fn test_error_path_inside_repeat() {
        let err = validation_error(json!({
            "voices": { "t": [ { "repeat": 2, "events": [ { "wait": 1 }, { "color": 9, "duration": 1 } ] } ] }
        }));
        assert_eq!(
            err.location,
            Location::Track {
                name: "t".into(),
                path: vec![0, 1]
            }
        );
        assert!(matches!(err.kind, ValidationErrorKind::OutOfRange { field: "color", .. }));
    }

    #[test]
    fn test_repeat_must_be_positive_integer() {
        for bad in [json!(0), json!(-1), json!(1.5), json!("3")] {
            let err = validation_error(json!({
                "voices": { "t": [ { "repeat": bad, "events": [ { "wait": 1 } ] } ] }
            }));
            assert!(
                matches!(err.kind, ValidationErrorKind::InvalidRepeat(_)),
                "repeat {bad} should be rejected, got {err}"
            );
        }
        let empty = validation_error(json!({ "voices": { "t": [ { "repeat": 2, "events": [] } ] } }));
        assert_eq!(empty.kind, ValidationErrorKind::EmptyRepeat);
    }

    #[test]
    fn test_negative_wait_rejected() {
        let err = validation_error(json!({ "voices": { "t": [ { "wait": -1 } ] } }));
        assert!(matches!(err.kind, ValidationErrorKind::OutOfRange { field: "wait", .. }));
    }

    #[test]
    fn test_global_ranges() {
        let err = validation_error(json!({ "voices": {}, "global": [ { "bitDepth": 1 } ] }));
        assert_eq!(err.location, Location::Global { path: vec![0] });
        assert!(matches!(err.kind, ValidationErrorKind::OutOfRange { field: "bitDepth", .. }));

        let err = validation_error(json!({ "voices": {}, "global": [ { "reverbSize": "huge" } ] }));
        assert!(matches!(err.kind, ValidationErrorKind::InvalidValue { field: "reverbSize", .. }));

        let err = validation_error(json!({ "voices": {}, "global": [ { "panRate": 2.5 } ] }));
        assert!(matches!(err.kind, ValidationErrorKind::OutOfRange { field: "panRate", .. }));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = validation_error(json!({ "voices": { "t": [ { "volume": 0.5 } ] } }));
        assert_eq!(err.kind, ValidationErrorKind::UnknownEvent);
    }

    #[test]
    fn test_expansion_limit() {
        let doc = json!({
            "voices": { "t": [ { "repeat": 1000, "events": [ { "repeat": 1000, "events": [ { "wait": 1 } ] } ] } ] }
        });
        let err = Composition::from_value(&doc, LIMIT).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::TooManyEvents { limit: LIMIT });
    }

    #[test]
    fn test_from_json_reports_malformed_text() {
        let err = Composition::from_json("{ voices: ", LIMIT).unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::MalformedJson(_)));
        assert!(Composition::from_json(r#"{ "voices": {} }"#, LIMIT).is_ok());
    }
}

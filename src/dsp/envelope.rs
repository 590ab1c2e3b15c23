//! ADSR envelope expressed as time-stamped gain automation.
//!
//! The envelope never integrates per-sample state: every transition is
//! recorded as a set-value or linear-ramp event at an absolute time, and the
//! gain at any instant is a pure function of those events. Live playback and
//! offline rendering therefore produce the same curve for the same events.

/// Envelope stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attacking,
    Decaying,
    Sustaining,
    Releasing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Curve {
    /// Jump to `value` at `time`.
    Set,
    /// Ramp linearly from the previous event to `value`, arriving at `time`.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct AutomationEvent {
    time: f64,
    value: f64,
    curve: Curve,
}

/// A gain parameter driven by scheduled automation events.
#[derive(Debug, Clone, Default)]
pub struct GainAutomation {
    /// Sorted by time; ties keep insertion order.
    events: Vec<AutomationEvent>,
    default_value: f64,
}

impl GainAutomation {
    pub fn new(default_value: f64) -> Self {
        GainAutomation {
            events: Vec::new(),
            default_value,
        }
    }

    fn insert(&mut self, event: AutomationEvent) {
        let at = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(at, event);
    }

    pub fn set_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(AutomationEvent {
            time,
            value,
            curve: Curve::Set,
        });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(AutomationEvent {
            time,
            value,
            curve: Curve::Linear,
        });
    }

    /// Drop every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        let keep = self.events.partition_point(|e| e.time < time);
        self.events.truncate(keep);
    }

    /// Forget history before `time`, keeping the event that defines the value at `time`.
    pub fn prune_before(&mut self, time: f64) {
        let settled = self.events.partition_point(|e| e.time <= time);
        if settled > 1 {
            let value = self.value_at(time);
            self.events.drain(..settled);
            self.events.insert(
                0,
                AutomationEvent {
                    time,
                    value,
                    curve: Curve::Set,
                },
            );
        }
    }

    /// Gain at `time`.
    #[inline]
    pub fn value_at(&self, time: f64) -> f64 {
        let next = self.events.partition_point(|e| e.time <= time);
        let (start_time, start_value) = match next.checked_sub(1) {
            Some(i) => (self.events[i].time, self.events[i].value),
            None => return self.default_value,
        };
        match self.events.get(next) {
            Some(end) if end.curve == Curve::Linear && end.time > start_time => {
                let t = (time - start_time) / (end.time - start_time);
                start_value + (end.value - start_value) * t
            }
            _ => start_value,
        }
    }
}

/// ADSR shape, in seconds (sustain is a level).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adsr {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for Adsr {
    fn default() -> Self {
        Adsr {
            attack: 0.5,
            decay: 0.0,
            sustain: 1.0,
            release: 0.5,
        }
    }
}

/// Stage boundaries recorded when the envelope was last started or released.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Marks {
    started: f64,
    attack_end: f64,
    decay_end: f64,
    release_start: Option<f64>,
    release_end: Option<f64>,
}

/// Amplitude envelope for one voice.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    gain: GainAutomation,
    marks: Option<Marks>,
}

impl Envelope {
    pub fn new() -> Self {
        Envelope {
            gain: GainAutomation::new(0.0),
            marks: None,
        }
    }

    /// Start attack at `now`: 0 -> 1 over attack, then 1 -> sustain over decay.
    ///
    /// Returns the time at which the sustain stage begins.
    pub fn start(&mut self, adsr: &Adsr, now: f64) -> f64 {
        self.gain.cancel_scheduled_values(now);
        self.gain.set_value_at_time(0.0, now);

        let attack_end = now + adsr.attack.max(0.0);
        self.gain.linear_ramp_to_value_at_time(1.0, attack_end);

        let decay_end = attack_end + adsr.decay.max(0.0);
        if adsr.decay > 0.0 {
            self.gain.linear_ramp_to_value_at_time(adsr.sustain, decay_end);
        } else {
            self.gain.set_value_at_time(adsr.sustain, attack_end);
        }

        self.marks = Some(Marks {
            started: now,
            attack_end,
            decay_end,
            release_start: None,
            release_end: None,
        });
        decay_end
    }

    /// Ramp from the current gain to zero over `release` seconds.
    ///
    /// Returns the time at which the gain reaches zero.
    pub fn release(&mut self, release: f64, now: f64) -> f64 {
        let current = self.gain.value_at(now);
        self.gain.cancel_scheduled_values(now);
        self.gain.set_value_at_time(current, now);
        let end = now + release.max(0.0);
        self.gain.linear_ramp_to_value_at_time(0.0, end);

        let marks = self.marks.get_or_insert(Marks {
            started: now,
            attack_end: now,
            decay_end: now,
            release_start: None,
            release_end: None,
        });
        marks.release_start = Some(now);
        marks.release_end = Some(end);
        end
    }

    /// Gain at `time`.
    #[inline]
    pub fn value_at(&self, time: f64) -> f64 {
        self.gain.value_at(time)
    }

    /// Which stage the envelope is in at `time`.
    pub fn stage_at(&self, time: f64) -> Stage {
        let Some(m) = self.marks else {
            return Stage::Idle;
        };
        if time < m.started {
            return Stage::Idle;
        }
        if let (Some(start), Some(end)) = (m.release_start, m.release_end) {
            if time >= start {
                return if time < end { Stage::Releasing } else { Stage::Idle };
            }
        }
        if time < m.attack_end {
            Stage::Attacking
        } else if time < m.decay_end {
            Stage::Decaying
        } else {
            Stage::Sustaining
        }
    }

    /// Drop automation history that no longer affects times at or after `time`.
    pub fn prune_before(&mut self, time: f64) {
        self.gain.prune_before(time);
    }

    /// True once a release has run to completion by `time`.
    pub fn is_finished(&self, time: f64) -> bool {
        self.stage_at(time) == Stage::Idle
    }
}

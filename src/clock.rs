//! Audio-domain time and cancelable timers.
//!
//! Control-side transitions (loop restarts, releases, composition events) are
//! deferred callbacks keyed to a monotonic clock measured in seconds. The
//! engine asks the clock for "now" and drains every timer due by then.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

/// A monotonic source of audio-domain time.
pub trait Clock {
    /// Current time in seconds.
    fn now(&self) -> f64;

    /// Called by the engine after `frames` frames have been rendered.
    fn frames_rendered(&mut self, frames: usize, sample_rate: f64);

    /// Stop or restart the passage of time.
    fn set_suspended(&mut self, _suspended: bool) {}
}

/// Time advanced by rendered audio frames.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    frames: u64,
    sample_rate: f64,
    suspended: bool,
}

impl FrameClock {
    pub fn new(sample_rate: f64) -> Self {
        FrameClock {
            frames: 0,
            sample_rate,
            suspended: false,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Clock for FrameClock {
    fn now(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.frames as f64 / self.sample_rate
        } else {
            0.0
        }
    }

    fn frames_rendered(&mut self, frames: usize, sample_rate: f64) {
        if !self.suspended {
            self.sample_rate = sample_rate;
            self.frames += frames as u64;
        }
    }

    fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }
}

/// A clock moved only by hand. Clones share the same time, so a test can
/// keep a handle after giving one to an engine.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock::default()
    }

    pub fn set(&self, seconds: f64) {
        if seconds > self.time.get() {
            self.time.set(seconds);
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.time.get() + seconds.max(0.0));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.time.get()
    }

    fn frames_rendered(&mut self, _frames: usize, _sample_rate: f64) {}
}

// ── Timers ──────────────────────────────────────────────────

/// Handle used to cancel a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Pending<A> {
    at: f64,
    seq: u64,
    action: A,
}

// Reversed so the max-heap pops the earliest deadline; ties fire in
// scheduling order.
impl<A> Ord for Pending<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<A> PartialOrd for Pending<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> PartialEq for Pending<A> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<A> Eq for Pending<A> {}

/// Deadline-ordered queue of deferred actions.
pub struct TimerQueue<A> {
    pending: BinaryHeap<Pending<A>>,
    next_seq: u64,
}

impl<A> Default for TimerQueue<A> {
    fn default() -> Self {
        TimerQueue {
            pending: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<A> TimerQueue<A> {
    pub fn new() -> Self {
        TimerQueue::default()
    }

    /// Schedule `action` to fire at `at` seconds.
    pub fn schedule(&mut self, at: f64, action: A) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Pending { at, seq, action });
        TimerId(seq)
    }

    /// Cancel one timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.seq != id.0);
        self.pending.len() != before
    }

    /// Cancel every timer whose action matches. Returns how many were removed.
    pub fn cancel_matching(&mut self, mut matches: impl FnMut(&A) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|p| !matches(&p.action));
        before - self.pending.len()
    }

    /// Remove and return the earliest timer due at or before `until`.
    pub fn pop_due(&mut self, until: f64) -> Option<(f64, A)> {
        if self.pending.peek()?.at > until {
            return None;
        }
        self.pending.pop().map(|p| (p.at, p.action))
    }

    /// Deadline of the earliest pending timer.
    pub fn next_deadline(&self) -> Option<f64> {
        self.pending.peek().map(|p| p.at)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

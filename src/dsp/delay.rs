//! Delay lines and the feedback comb tap.

/// A mono circular delay line.
///
/// The buffer holds up to `max_delay_seconds` of audio; the delay time can be
/// changed while running.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
    delay_samples: usize,
}

impl DelayLine {
    pub fn new(sample_rate: f64, max_delay_seconds: f64, delay_time: f64) -> Self {
        let buffer_size = (sample_rate * max_delay_seconds) as usize + 2;
        let mut line = DelayLine {
            buffer: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
            delay_samples: 1,
        };
        line.set_delay_time(delay_time);
        line
    }

    /// Set the delay in seconds, clamped to the buffer and at least one sample.
    pub fn set_delay_time(&mut self, seconds: f64) {
        let samples = (seconds.max(0.0) * self.sample_rate).round() as usize;
        self.delay_samples = samples.clamp(1, self.buffer.len() - 1);
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    /// The sample written `delay_samples` ago.
    #[inline]
    pub fn read(&self) -> f32 {
        let len = self.buffer.len();
        let read_pos = (self.write_pos + len - self.delay_samples) % len;
        self.buffer[read_pos]
    }

    /// Push one sample and advance.
    #[inline]
    pub fn write(&mut self, input: f32) {
        self.buffer[self.write_pos] = input;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    /// Read the delayed sample, then write `input`.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let out = self.read();
        self.write(input);
        out
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Longest comb delay the graph supports.
pub const MAX_COMB_DELAY: f64 = 0.1;

/// Stereo feedback comb: the delayed signal is fed back into its own input.
///
/// Returns only the wet (delayed) path; the caller weights and sums it.
#[derive(Debug, Clone)]
pub struct CombDelay {
    line_l: DelayLine,
    line_r: DelayLine,
    /// Feedback amount (0.0 to 0.99).
    pub feedback: f32,
}

impl CombDelay {
    pub fn new(sample_rate: f64) -> Self {
        CombDelay {
            line_l: DelayLine::new(sample_rate, MAX_COMB_DELAY, 0.005),
            line_r: DelayLine::new(sample_rate, MAX_COMB_DELAY, 0.005),
            feedback: 0.0,
        }
    }

    pub fn set_delay_time(&mut self, seconds: f64) {
        let seconds = seconds.clamp(0.0, MAX_COMB_DELAY);
        self.line_l.set_delay_time(seconds);
        self.line_r.set_delay_time(seconds);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let feedback = self.feedback.clamp(0.0, 0.99);
        let delayed_l = self.line_l.read();
        let delayed_r = self.line_r.read();
        self.line_l.write(left + delayed_l * feedback);
        self.line_r.write(right + delayed_r * feedback);
        (delayed_l, delayed_r)
    }

    pub fn clear(&mut self) {
        self.line_l.clear();
        self.line_r.clear();
    }
}

//! Mixer — stereo panning law and the voice summing bus.

use std::f32::consts::FRAC_PI_2;

/// Equal-power stereo panner for a stereo input (StereoPannerNode law).
///
/// `pan` is in [-1, 1]. Panning left folds part of the right channel into the
/// left and attenuates the right; panning right does the mirror image.
#[inline]
pub fn pan_stereo(left: f32, right: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan <= 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        (left + right * x.cos(), right * x.sin())
    } else {
        let x = pan * FRAC_PI_2;
        (left * x.cos(), right + left * x.sin())
    }
}

/// Sums stereo frames from many sources into one block.
#[derive(Debug, Clone, Default)]
pub struct Mixer {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl Mixer {
    pub fn new() -> Self {
        Mixer::default()
    }

    /// Reserve a block of `frames` zeroed frames. Allocates only when growing.
    pub fn clear(&mut self, frames: usize) {
        self.left.clear();
        self.left.resize(frames, 0.0);
        self.right.clear();
        self.right.resize(frames, 0.0);
    }

    /// Add a frame at the given index.
    #[inline]
    pub fn add(&mut self, index: usize, left: f32, right: f32) {
        if index < self.left.len() {
            self.left[index] += left;
            self.right[index] += right;
        }
    }

    #[inline]
    pub fn frame(&self, index: usize) -> (f32, f32) {
        (self.left[index], self.right[index])
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

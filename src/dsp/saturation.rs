//! Wave-shaping saturation curves.

use serde::{Deserialize, Serialize};

/// Shape of the saturation transfer curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaturationMode {
    /// Symmetric tanh(2x).
    #[default]
    Soft,
    /// Linear gain of 1.5 clipped at +-0.8.
    Hard,
    /// Asymmetric tanh: gentler on the positive half.
    Warm,
}

impl SaturationMode {
    /// Apply the transfer curve. Input outside [-1, 1] is held at the curve ends.
    #[inline]
    pub fn shape(self, x: f32) -> f32 {
        let x = x.clamp(-1.0, 1.0);
        match self {
            SaturationMode::Soft => (x * 2.0).tanh(),
            SaturationMode::Hard => (x * 1.5).clamp(-0.8, 0.8),
            SaturationMode::Warm => {
                if x >= 0.0 {
                    (x * 1.5).tanh()
                } else {
                    (x * 2.0).tanh()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curves_pass_through_zero() {
        for mode in [SaturationMode::Soft, SaturationMode::Hard, SaturationMode::Warm] {
            assert_eq!(mode.shape(0.0), 0.0, "{mode:?} should map 0 to 0");
        }
    }

    #[test]
    fn hard_clips_at_point_eight() {
        assert_eq!(SaturationMode::Hard.shape(0.9), 0.8);
        assert_eq!(SaturationMode::Hard.shape(-5.0), -0.8);
        assert!((SaturationMode::Hard.shape(0.2) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn warm_is_asymmetric() {
        let pos = SaturationMode::Warm.shape(0.5);
        let neg = SaturationMode::Warm.shape(-0.5);
        assert!(pos < -neg, "Warm curve should compress negatives harder");
    }

    #[test]
    fn soft_is_bounded() {
        for i in -100..=100 {
            let y = SaturationMode::Soft.shape(i as f32 * 0.1);
            assert!(y.abs() <= 1.0);
        }
    }
}

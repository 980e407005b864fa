//! Distortion applied by sensors flagged as noisy.

use crate::config::NoiseConfig;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseModel {
    magnitude: i64,
    false_priority_probability: f64,
}

impl NoiseModel {
    pub fn new(config: &NoiseConfig) -> Self {
        Self {
            magnitude: config.magnitude as i64,
            false_priority_probability: config.false_priority_probability.clamp(0.0, 1.0),
        }
    }

    /// Distort one ground-truth reading.
    ///
    /// The count moves by a uniform integer in `[-magnitude, magnitude]` and
    /// never drops below zero. A true priority flag is always kept.
    pub fn apply<R: Rng>(&self, rng: &mut R, traffic: u32, priority: bool) -> (u32, bool) {
        let offset = if self.magnitude > 0 {
            rng.random_range(-self.magnitude..=self.magnitude)
        } else {
            0
        };
        let noisy = (traffic as i64 + offset).clamp(0, u32::MAX as i64) as u32;
        let priority = priority || rng.random_bool(self.false_priority_probability);
        (noisy, priority)
    }
}

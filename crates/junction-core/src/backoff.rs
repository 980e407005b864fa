//! Retry pacing for startup waits and reconnects.
//!
//! Sensors retry their listener bind, and every process retries loading
//! configuration or topology that may not exist yet. Both go through
//! [`Backoff`] so a missing dependency never turns into a tight loop.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    factor: u32,
    jitter_ratio: f64,
    attempts: u32,
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Doubling delay from `base`, capped at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            current: base,
            factor: 2,
            jitter_ratio: 0.2,
            attempts: 0,
            max_attempts: None,
        }
    }

    /// Same delay every time, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            factor: 1,
            jitter_ratio: 0.0,
            ..Self::new(delay, delay)
        }
    }

    /// Give up after `attempts` failures.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempts >= max)
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempts = 0;
    }

    /// Record a failure. Returns the delay before the next attempt, or `None`
    /// once the attempt budget is spent.
    pub fn fail(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.exhausted() {
            return None;
        }
        let delay = add_jitter(self.current, self.jitter_ratio);
        self.current = self.current.saturating_mul(self.factor).min(self.max);
        Some(delay)
    }
}

fn add_jitter(delay: Duration, ratio: f64) -> Duration {
    if !(0.0..=1.0).contains(&ratio) || ratio == 0.0 {
        return delay;
    }
    let max_jitter_ms = (delay.as_millis() as f64 * ratio) as u64;
    if max_jitter_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
}

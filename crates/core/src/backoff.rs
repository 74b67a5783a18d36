//! Exponential backoff between upload attempts

use crate::error::{Error, Result};
use rand::Rng;
use std::time::Duration;

/// Retry schedule for a single file.
///
/// `delay_for(n) = min(base * multiplier^(n-1), max_delay)`. The policy holds
/// no counters; the orchestrator owns the attempt number.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: u32,
    jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy without jitter
    pub fn new(base: Duration, multiplier: f64, max_delay: Duration, max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config(format!(
                "backoff multiplier must be a finite number >= 1 (got {})",
                multiplier
            )));
        }

        Ok(Self {
            base,
            multiplier,
            max_delay: max_delay.max(base),
            max_attempts,
            jitter: false,
        })
    }

    /// Enable or disable randomised delays
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Maximum number of attempts per file, first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// `delay_for(attempt)` scaled down by a random factor in `[0.5, 1.0]`
    pub fn jittered_delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let secs = self.delay_for(attempt).as_secs_f64();
        if secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rng.gen_range(secs / 2.0..=secs))
    }

    /// The delay the orchestrator actually sleeps, honouring the jitter setting
    pub fn next_delay(&self, attempt: u32) -> Duration {
        if self.jitter {
            self.jittered_delay_for(attempt, &mut rand::thread_rng())
        } else {
            self.delay_for(attempt)
        }
    }
}

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        /// Scale each delay by a random factor in `[0.5, 1.0]`
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before the next attempt after `failures` consecutive failures (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                // Cap before converting so huge exponents never overflow
                let secs = if secs.is_finite() {
                    secs.min(max.as_secs_f64())
                } else {
                    max.as_secs_f64()
                };
                let delay = Duration::from_secs_f64(secs.max(0.0));
                if *jitter {
                    delay.mul_f64(rand::rng().random_range(0.5..=1.0))
                } else {
                    delay
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Fixed(DEFAULT_RETRY_DELAY),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// `None` once the budget is spent
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if failures >= max => None,
            _ => Some(self.backoff.delay(failures)),
        }
    }
}

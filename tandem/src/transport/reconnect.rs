//! Reconnect scheduling after an abnormal close.

use std::time::Duration;

use rand::Rng;

/// Default delay of the fixed policy.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// How long to wait before each reconnect attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt, never gives up.
    Fixed {
        /// Delay before each attempt.
        delay: Duration,
    },
    /// Exponential backoff with jitter and an optional attempt cap.
    Backoff(BackoffConfig),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Parameters of [`ReconnectPolicy::Backoff`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first attempt.
    pub initial: Duration,
    /// Upper bound of any delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Relative jitter in `[0, 1]`; 0.2 spreads a delay over ±20%.
    pub jitter: f64,
    /// Give up after this many consecutive attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: Some(10),
        }
    }
}

impl BackoffConfig {
    /// Delay before `attempt` without jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based), or `None` to give up.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Fixed { delay } => Some(*delay),
            Self::Backoff(cfg) => {
                if cfg.max_attempts.is_some_and(|max| attempt > max) {
                    return None;
                }
                let base = cfg.base_delay(attempt);
                let jitter = cfg.jitter.clamp(0.0, 1.0);
                if jitter <= f64::EPSILON {
                    return Some(base);
                }
                let scale = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
                Some(base.mul_f64(scale).min(cfg.max))
            }
        }
    }
}

//! Exponential reconnect backoff
//!
//! Both long-lived transports share this shape; the push channel gives up
//! after a bounded number of attempts while the notification socket retries
//! forever at the cap. The constants are configuration.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Reconnect delay policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    /// `None` retries indefinitely
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    /// Push channel: 1s, 2s, 4s, 8s, 16s, then give up
    pub fn push_default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
            max_attempts: Some(5),
        }
    }

    /// Notification socket: same growth, never gives up
    pub fn notification_default() -> Self {
        Self {
            max_attempts: None,
            ..Self::push_default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = self
            .factor
            .checked_pow(exponent)
            .and_then(|multiplier| self.base.checked_mul(multiplier));
        match delay {
            Some(delay) => delay.min(self.cap),
            None => self.cap,
        }
    }

    /// `failures` consecutive failures exceed the retry budget
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures > max)
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            factor: config.factor.max(1),
            cap: Duration::from_millis(config.cap_ms),
            max_attempts: config.max_attempts,
        }
    }
}

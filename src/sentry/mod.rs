//! Retry sessions for unconfirmed top-level jobs

pub mod listener;
pub mod retry;
pub mod session;

pub use listener::PendingJobListener;
pub use retry::RetrySessionJob;
pub use session::{SessionManager, SessionOutcome};

use crate::config::SentryConfig;

use rand::Rng;
use std::time::Duration;

/// Exponential backoff applied when a session run fails on a transient
/// error. Jittered so a scheduler outage does not resynchronize sessions.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &SentryConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.backoff_initial_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            max_attempts: config.backoff_max_attempts,
        }
    }

    /// Delay before the given retry attempt: doubling, capped, with full
    /// jitter over the upper half.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.initial.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max);
        let half_ms = capped.as_millis() as u64 / 2;
        let jitter_ms = rand::thread_rng().gen_range(0..=half_ms.max(1));
        Duration::from_millis(half_ms + jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_capped() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(1000),
            max: Duration::from_millis(4000),
            max_attempts: 5,
        };

        for attempt in 0..8 {
            let delay = policy.delay(attempt);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(4000));
        }
    }
}

use std::time::Duration;

use rand::Rng;

use crate::config::TransferConfig;

/// Capped exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for RetryPolicy {
    fn from(config: &TransferConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.base_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (`attempt` is 1-based).
    /// Uniform in `[d/2, d]` where `d = min(max, base * 2^(attempt-1))`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ceiling = self.base.saturating_mul(1u32 << exp).min(self.max);
        let ceiling_us = ceiling.as_micros() as u64;
        if ceiling_us < 2 {
            return ceiling;
        }
        Duration::from_micros(rand::thread_rng().gen_range(ceiling_us / 2..=ceiling_us))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(10),
            max: Duration::from_millis(50),
        };

        for _ in 0..100 {
            let first = policy.backoff(1);
            assert!(first >= Duration::from_millis(5) && first <= Duration::from_millis(10));

            let third = policy.backoff(3);
            assert!(third >= Duration::from_millis(20) && third <= Duration::from_millis(40));

            let tenth = policy.backoff(10);
            assert!(tenth <= Duration::from_millis(50));
        }
    }

    #[test]
    fn test_zero_base_means_no_wait() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base: Duration::ZERO,
            max: Duration::ZERO,
        };
        assert_eq!(policy.backoff(4), Duration::ZERO);
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.max, Duration::from_millis(500));
    }
}

//! Retry policy for session self-healing.

use std::time::Duration;

use super::errors::SessionError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How many times, and how patiently, a session retries a lost connection.
///
/// Delay before retry `n` (0-based) is `backoff_base * backoff_multiplier^n`,
/// so the defaults give 1s, 2s, 4s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            backoff_base,
            backoff_multiplier,
        }
    }

    /// A policy that gives up on the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the 0-based retry `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let nanos = self.backoff_base.as_nanos() as f64 * factor;
        if nanos >= u64::MAX as f64 {
            Duration::MAX
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "backoff_multiplier must be a finite number >= 1.0, got {}",
                    self.backoff_multiplier
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn test_fractional_multiplier() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100), 1.5);
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(150));
    }

    #[test]
    fn test_huge_backoff_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(3600), 10.0);
        assert_eq!(policy.backoff(90), Duration::MAX);
    }

    #[test]
    fn test_validate_multiplier() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::new(1, Duration::from_millis(10), 0.5)
            .validate()
            .is_err());
        assert!(RetryPolicy::new(1, Duration::from_millis(10), f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(RetryPolicy::no_retry().max_attempts, 0);
    }
}

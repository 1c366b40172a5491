//! Wait-time policies: the pause between a user's consecutive task
//! executions.
//!
//! A policy is stateless and cheap to clone; every virtual user holds its
//! own copy and draws from its own RNG, so there is no shared state behind
//! the pacing decisions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::prelude::*;

use crate::error::ConfigError;

/// Rule determining the pause between a user's successive task executions.
#[derive(Clone, Default)]
pub enum WaitTimePolicy {
    /// No pause: the user loops as fast as its tasks complete.
    #[default]
    None,
    /// Constant pause after every execution.
    Fixed(Duration),
    /// Uniform random pause in `[min, max]`.
    Between(Duration, Duration),
    /// Caller-supplied distribution.
    Custom(Arc<dyn Fn() -> Duration + Send + Sync>),
}

impl WaitTimePolicy {
    /// Uniform random pause, validating that the range is not inverted.
    pub fn between(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvertedWaitRange { min, max });
        }
        Ok(WaitTimePolicy::Between(min, max))
    }

    /// Draws the next pause duration.
    pub fn next_delay(&self, rng: &mut impl Rng) -> Duration {
        match self {
            WaitTimePolicy::None => Duration::ZERO,
            WaitTimePolicy::Fixed(d) => *d,
            WaitTimePolicy::Between(min, max) => {
                if min == max {
                    return *min;
                }
                let span = max.as_millis() - min.as_millis();
                let offset = rng.random_range(0..=span) as u64;
                *min + Duration::from_millis(offset)
            }
            WaitTimePolicy::Custom(f) => f(),
        }
    }
}

impl fmt::Debug for WaitTimePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitTimePolicy::None => write!(f, "None"),
            WaitTimePolicy::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            WaitTimePolicy::Between(min, max) => {
                f.debug_tuple("Between").field(min).field(max).finish()
            }
            WaitTimePolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_constant() {
        let mut rng = rand::rng();
        let policy = WaitTimePolicy::Fixed(Duration::from_millis(250));
        for _ in 0..10 {
            assert_eq!(policy.next_delay(&mut rng), Duration::from_millis(250));
        }
    }

    #[test]
    fn between_stays_in_bounds() {
        let mut rng = rand::rng();
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        let policy = WaitTimePolicy::between(min, max).unwrap();
        for _ in 0..1_000 {
            let d = policy.next_delay(&mut rng);
            assert!(d >= min && d <= max, "{d:?} outside [{min:?}, {max:?}]");
        }
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = WaitTimePolicy::between(Duration::from_secs(2), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvertedWaitRange { .. }));
    }

    #[test]
    fn custom_distribution_is_used() {
        let mut rng = rand::rng();
        let policy = WaitTimePolicy::Custom(Arc::new(|| Duration::from_millis(42)));
        assert_eq!(policy.next_delay(&mut rng), Duration::from_millis(42));
    }
}

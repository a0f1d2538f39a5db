// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Backoff policies for the reconnect supervisor.
//!
//! The default is a fixed one second delay between attempts and no attempt limit.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// BackoffStrategy
// =============================================================================

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    Fixed {
        /// Delay.
        #[serde(with = "duration_millis")]
        delay: Duration,
    },

    /// Delay grows by a constant increment.
    Linear {
        /// Delay before the first attempt.
        #[serde(with = "duration_millis")]
        initial: Duration,
        /// Increment per attempt.
        #[serde(with = "duration_millis")]
        increment: Duration,
        /// Upper bound.
        #[serde(with = "duration_millis")]
        max: Duration,
    },

    /// Delay is multiplied on every attempt.
    Exponential {
        /// Delay before the first attempt.
        #[serde(with = "duration_millis")]
        initial: Duration,
        /// Growth factor.
        multiplier: f64,
        /// Upper bound.
        #[serde(with = "duration_millis")]
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Fixed delay strategy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Exponential strategy doubling from `initial` up to `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier: 2.0,
            max,
        }
    }

    /// Delay before the given attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_sub(1);
        match self {
            Self::Fixed { delay } => *delay,
            Self::Linear {
                initial,
                increment,
                max,
            } => initial.saturating_add(increment.saturating_mul(step)).min(*max),
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.max(1.0).powi(step.min(64) as i32);
                let millis = (initial.as_millis() as f64 * factor).min(max.as_millis() as f64);
                Duration::from_millis(millis as u64)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Fixed {
            delay: ReconnectPolicy::DEFAULT_BACKOFF,
        }
    }
}

// =============================================================================
// ReconnectPolicy
// =============================================================================

/// How the supervisor retries a dropped connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReconnectPolicy {
    /// Delay schedule.
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Give up after this many consecutive failed attempts. `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Default fixed backoff.
    pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

    /// Creates the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the attempt limit.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Returns `true` if another attempt is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_one_second() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff.delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff.delay(50), Duration::from_secs(1));
        assert!(policy.allows(10_000));
    }

    #[test]
    fn test_linear_is_capped() {
        let backoff = BackoffStrategy::Linear {
            initial: Duration::from_millis(100),
            increment: Duration::from_millis(50),
            max: Duration::from_millis(220),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(150));
        assert_eq!(backoff.delay(4), Duration::from_millis(220));
    }

    #[test]
    fn test_exponential() {
        let backoff = BackoffStrategy::exponential(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(30), Duration::from_secs(1));
    }

    #[test]
    fn test_attempt_limit() {
        let policy = ReconnectPolicy::new().with_max_attempts(2);
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn test_serde() {
        let policy = ReconnectPolicy::new().with_backoff(BackoffStrategy::fixed(Duration::from_millis(250)));
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"kind\":\"fixed\""));
        assert!(json.contains("250"));
    }
}

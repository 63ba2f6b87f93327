//! Bounded retry with exponential backoff for blocking completions.
//!
//! Streaming calls are never retried: once a fragment has reached the
//! transcript a second attempt would duplicate it.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "secs_f64")]
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    #[serde(with = "secs_f64")]
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to shave a deterministic fraction off each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given attempt budget and default delays.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Attempt budget with no delay between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Run `call` until it succeeds, a non-retryable error occurs, or the
/// attempt budget is spent. The last error is returned unchanged.
pub async fn retry_call<T, F, Fut>(config: &RetryConfig, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt < max_attempts && e.is_retryable() {
                    let delay = config.delay_for_attempt(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        "Provider call failed: {e}. Retrying in {delay:?}..."
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

mod secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MurmurError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_config_three_attempts() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig::with_attempts(10);
        assert_eq!(config.delay_for_attempt(9), Duration::from_secs(10));
    }

    #[test]
    fn jitter_reduces_delay() {
        let jittered = RetryConfig {
            jitter: true,
            ..RetryConfig::default()
        };
        assert!(jittered.delay_for_attempt(2) < RetryConfig::default().delay_for_attempt(2));
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        assert_eq!(RetryConfig::with_attempts(0).max_attempts, 1);
    }

    #[test]
    fn config_deserializes_seconds() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 5, "initial_delay": 0.5}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry_call(&RetryConfig::immediate(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(MurmurError::ProviderRequestFailed(format!("HTTP 503 #{n}")))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget_with_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_call(&RetryConfig::immediate(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(MurmurError::ProviderRequestFailed(format!("failure {n}")))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(MurmurError::ProviderRequestFailed(msg)) => assert_eq!(msg, "failure 3"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_configured_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_call(&RetryConfig::immediate(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MurmurError::ProviderNotConfigured {
                provider: "bedrock",
                reason: "no key".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

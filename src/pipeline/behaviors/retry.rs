//! Retry behavior with exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MediatorError, Result};
use crate::handler::Envelope;
use crate::message::AnyValue;
use crate::pipeline::{Continuation, OpenBehavior};

/// How often and how fast a failed request is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first; `0` behaves like `1`.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let ms = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let ms = if ms.is_finite() {
            ms.clamp(0.0, self.max_backoff_ms as f64) as u64
        } else {
            self.max_backoff_ms
        };
        Duration::from_millis(ms)
    }
}

/// Re-runs the rest of the pipeline while it fails with a retryable error.
///
/// Backoff sleeps end early with [`MediatorError::Cancelled`] when the caller
/// cancels.
#[derive(Debug, Clone, Default)]
pub struct RetryBehavior {
    policy: RetryPolicy,
}

impl RetryBehavior {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl OpenBehavior for RetryBehavior {
    async fn handle(&self, envelope: &Envelope, next: Continuation) -> Result<AnyValue> {
        let ctx = envelope.context();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match next.run().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if attempt >= max_attempts || !err.is_retryable() || ctx.is_cancelled() {
                return Err(err);
            }

            let delay = self.policy.next_delay(attempt);
            tracing::warn!(
                target: "source_mediator::dispatch",
                call_id = ctx.call_id(),
                message = ctx.message_type().name(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Retrying request"
            );

            tokio::select! {
                _ = ctx.cancelled() => return Err(MediatorError::cancelled(ctx.message_type())),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.next_delay(1), Duration::from_millis(50));
        assert_eq!(policy.next_delay(2), Duration::from_millis(100));
        assert_eq!(policy.next_delay(3), Duration::from_millis(200));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_backoff_ms: 300,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_delay(10), Duration::from_millis(300));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_millis(300));
    }

    #[test]
    fn test_non_finite_multiplier() {
        let policy = RetryPolicy {
            multiplier: f64::INFINITY,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_delay(2), Duration::from_millis(policy.max_backoff_ms));
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff_ms, 50);
    }
}

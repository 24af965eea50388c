//! Bounded retry policies for outbound calls.
//!
//! Transport retries and schema-parse retries are configured separately:
//! the gateway applies the transport policy to every model call, while
//! callers that parse structured output wrap the whole generation in
//! [`retry_schema`] with their own policy.

use super::GatewayError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Wait the same duration between every attempt.
    Fixed(Duration),
    /// Double the wait after each failure, starting at `initial` and capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to apply after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// A bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Wait strategy between attempts.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Transport policy: 3 attempts, exponential backoff from 1s up to 5s.
    pub fn transport() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(5),
            },
        }
    }

    /// Schema-parse policy: 3 attempts, 1s apart.
    pub fn schema() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(1)),
        }
    }

    /// A policy that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    /// Attempts actually allowed by this policy.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Sleep for the backoff that follows `attempt`.
    pub async fn wait(&self, attempt: u32) {
        let delay = self.backoff.delay_after(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transport()
    }
}

/// Run a structured generation, retrying the whole call on schema-parse failures.
///
/// Only [`GatewayError::SchemaParse`] is retried; transport failures have
/// already been retried inside the gateway and propagate immediately. When
/// every attempt fails, the last parse error is returned.
pub async fn retry_schema<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(GatewayError::SchemaParse(reason)) if attempt < attempts => {
                tracing::warn!(what, attempt, attempts, %reason, "structured output rejected, retrying");
                policy.wait(attempt).await;
                attempt += 1;
            }
            Err(err) => {
                if matches!(err, GatewayError::SchemaParse(_)) {
                    tracing::error!(what, attempts, error = %err, "structured output rejected on every attempt");
                }
                return Err(err);
            }
        }
    }
}

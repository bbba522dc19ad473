// src/collab/retry.rs — Retry with exponential backoff for collaborator calls
//
// Retries: transient generator/evaluator failures, rate limits.
// Does NOT retry: authentication errors, configuration errors,
// prompt-construction errors.

use std::time::Duration;

use crate::infra::errors::RepromptError;

/// Default retry configuration.
const INITIAL_DELAY_MS: u64 = 1_000;
const BACKOFF_FACTOR: f64 = 2.0;
const MAX_DELAY_MS: u64 = 30_000;
const JITTER_FRACTION: f64 = 0.2;

/// Configuration for retry behavior around one collaborator.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    /// Policy with default timing and the given attempt cap. The cap comes
    /// from config (`user_model_max_retries` / `feedback_model_max_retries`).
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            backoff_factor: BACKOFF_FACTOR,
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            jitter_fraction: JITTER_FRACTION,
        }
    }

    /// Calculate the delay for a given retry attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32, rate_limit_delay: Option<Duration>) -> Duration {
        // If the service told us how long to wait, use that (with a small buffer).
        if let Some(rl_delay) = rate_limit_delay {
            return rl_delay + Duration::from_millis(100);
        }

        let base_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let jitter = deterministic_jitter(attempt, self.jitter_fraction);
        let final_ms = (capped_ms * jitter).max(100.0);

        Duration::from_millis(final_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_retries(2)
    }
}

/// Determine if an error should be retried.
pub fn should_retry(error: &RepromptError) -> bool {
    match error {
        RepromptError::RateLimited { .. } => true,
        RepromptError::Generator { retriable, .. } => *retriable,
        RepromptError::Evaluator { retriable, .. } => *retriable,
        // Auth failures need a new key, not another attempt
        RepromptError::Auth(_) => false,
        _ => false,
    }
}

/// Extract the rate-limit retry delay from the error, if available.
pub fn rate_limit_delay(error: &RepromptError) -> Option<Duration> {
    match error {
        RepromptError::RateLimited { retry_after_ms } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

/// Deterministic jitter for a given attempt to keep retries reproducible in
/// tests. Returns a multiplier in [1 - fraction, 1 + fraction].
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64; // 0.0..1.0
    1.0 + fraction * (2.0 * hash - 1.0)
}

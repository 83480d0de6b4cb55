//! Retry with exponential backoff for idempotent gateway reads.

use medlink_types::GatewayError;
use rand::Rng;

/// Configuration for retry behavior on transient gateway errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Initial delay in milliseconds before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds between retries.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}

/// Returns `true` if the error is transient and a read may be retried.
pub fn is_retryable(error: &GatewayError) -> bool {
    matches!(
        error,
        GatewayError::RateLimited { .. }
            | GatewayError::Server { .. }
            | GatewayError::Network(_)
            | GatewayError::Timeout
    )
}

/// Calculate the delay in milliseconds before the next retry attempt.
///
/// A server-provided `Retry-After` wins (clamped to `max_delay_ms`).
/// Otherwise `initial_delay_ms * backoff_factor^attempt` with ±25% jitter,
/// clamped to `max_delay_ms`.
pub fn calculate_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> u64 {
    if let Some(server_delay) = retry_after_ms {
        return server_delay.min(config.max_delay_ms);
    }

    let base = config.initial_delay_ms as f64 * config.backoff_factor.powi(attempt as i32);
    let clamped = base.min(config.max_delay_ms as f64);

    let jitter_factor = rand::rng().random_range(0.75..=1.25);
    let jittered = clamped * jitter_factor;

    (jittered as u64).min(config.max_delay_ms)
}

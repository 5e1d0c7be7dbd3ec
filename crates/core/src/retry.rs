//! Exponential backoff executor.
//!
//! Runs an async operation and retries it while the caller's predicate says
//! the failure is transient. The delay before retry `n` (0-based) is
//! `min(base_delay * multiplier^n, max_delay)`, spread by a random jitter.
//! Non-retryable errors return immediately without sleeping.
//!
//! # Example
//!
//! ```ignore
//! use strangle_core::retry::{execute, BackoffConfig};
//!
//! let positions = execute("list_positions", &BackoffConfig::default(), |e: &IgError| e.is_retryable(), || {
//!     client.fetch_positions()
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RetryError, ValidationError};

/// Retry budget and delay curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Relative jitter (0.1 = ±10%). Zero disables jitter.
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.1,
        }
    }
}

impl BackoffConfig {
    /// A config that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets base and maximum delays.
    #[must_use]
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Sets the jitter ratio.
    #[must_use]
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    /// Un-jittered delay before retrying after the given 0-based attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let millis = delay.as_millis() as f64;
        let spread = millis * self.jitter_ratio;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let jittered = (millis + offset).clamp(0.0, self.max_delay_ms as f64);
        Duration::from_millis(jittered as u64)
    }

    /// Checks the delay curve is usable.
    ///
    /// # Errors
    /// Returns `ValidationError` for a multiplier below 1, a base delay above
    /// the maximum, or a jitter ratio outside `[0, 1)`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(ValidationError::new(
                "backoff_multiplier",
                format!("must be a finite value >= 1, got {}", self.backoff_multiplier),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ValidationError::new(
                "base_delay_ms",
                format!(
                    "base delay {}ms exceeds max delay {}ms",
                    self.base_delay_ms, self.max_delay_ms
                ),
            ));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(ValidationError::new(
                "jitter_ratio",
                format!("must lie in [0, 1), got {}", self.jitter_ratio),
            ));
        }
        if self.max_retries > 20 {
            return Err(ValidationError::new(
                "max_retries",
                format!("must be at most 20, got {}", self.max_retries),
            ));
        }
        Ok(())
    }
}

/// Runs `operation` under exponential backoff.
///
/// `is_retryable` decides whether a failure is worth another attempt.
///
/// # Errors
/// Returns a [`RetryError`] naming the operation and attempt count when the
/// error is not retryable or the retry budget is spent.
pub async fn execute<T, E, F, Fut, P>(
    name: &str,
    config: &BackoffConfig,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempts: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts += 1;
                let retryable = is_retryable(&err);

                if !retryable || attempts > config.max_retries {
                    return Err(RetryError {
                        operation: name.to_string(),
                        attempts,
                        exhausted: retryable,
                        last_error: err,
                    });
                }

                let delay = config.jittered(config.delay_for_attempt(attempts - 1));
                warn!(
                    operation = name,
                    attempt = attempts,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

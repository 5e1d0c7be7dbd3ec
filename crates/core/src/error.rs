//! Error types shared across the workspace.
//!
//! `ValidationError` and `ConfigError` are raised synchronously when a value
//! is assigned or the application starts. `RetryError` wraps the last failure
//! of an operation run through [`crate::retry::execute`].

use std::fmt;

use thiserror::Error;

/// An input parameter is outside its safe range or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Name of the rejected parameter.
    pub field: &'static str,
    /// Why the value was rejected.
    pub reason: String,
}

impl ValidationError {
    /// Creates a validation error for `field`.
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Required startup configuration is missing or structurally invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key has no value.
    #[error("missing configuration value: {0}")]
    Missing(String),

    /// A credential still holds a template placeholder.
    #[error("placeholder value configured for {0}")]
    Placeholder(String),

    /// A value failed range or format validation.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),

    /// The configuration sources could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(err.to_string())
    }
}

/// Failure of an operation run under the backoff executor.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Name the operation was registered under.
    pub operation: String,
    /// Number of attempts made, including the first.
    pub attempts: u32,
    /// True when the failure was retryable but the retry budget ran out.
    pub exhausted: bool,
    /// The error returned by the final attempt.
    pub last_error: E,
}

impl<E> RetryError<E> {
    /// Returns the error from the final attempt.
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exhausted {
            write!(
                f,
                "{} failed after {} attempts (retries exhausted): {}",
                self.operation, self.attempts, self.last_error
            )
        } else {
            write!(
                f,
                "{} failed on attempt {}: {}",
                self.operation, self.attempts, self.last_error
            )
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

//! Error taxonomy for the trade lifecycle.

use rust_decimal::Decimal;
use strangle_core::{ConfigError, ValidationError};
use strangle_ig::IgError;
use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::types::LegKind;

/// Errors raised while driving a trade cycle.
#[derive(Debug, Error)]
pub enum TradingError {
    /// A parameter was rejected at assignment.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Startup configuration is unusable.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// A broker call failed after retries.
    #[error("broker error: {0}")]
    Api(#[from] IgError),

    /// The broker confirmed a deal with a non-accepted status.
    #[error("{leg} deal {deal_reference} rejected: {reason}")]
    DealRejected {
        leg: LegKind,
        deal_reference: String,
        reason: String,
    },

    /// No contract satisfies the strike-side filter.
    #[error("no {leg} contract available around {price} at distance {delta}")]
    NoContract {
        leg: LegKind,
        price: Decimal,
        delta: Decimal,
    },

    /// An instrument has no usable quote.
    #[error("no quote for {0}")]
    NoQuote(String),

    /// Internal state does not satisfy the lifecycle invariants.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The cycle snapshot could not be saved or loaded.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl TradingError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }
}

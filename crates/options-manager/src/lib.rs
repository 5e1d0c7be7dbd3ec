//! Deterministic event strangle management.
//!
//! Runs as a long-lived service that:
//! - Enters a put and a call around a scheduled event, sized from a budget
//! - Confirms fills and resubmits legs the broker refused
//! - Enforces stop-loss, trailing stop and two profit tiers per leg
//! - Unwinds the opposite leg when one leg pays off
//! - Persists the trade cycle so a restart resumes where it left off
//!
//! All rules are pure functions of leg state and quotes; only the lifecycle
//! and executor talk to the broker.

pub mod allocation;
pub mod broker;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod market;
pub mod monitor;
pub mod persistence;
pub mod rules;
pub mod selector;
pub mod service;
pub mod status;
pub mod stops;
pub mod targets;
pub mod types;

#[cfg(test)]
mod testutil;

pub use broker::BrokerApi;
pub use error::TradingError;
pub use lifecycle::{TickOutcome, TradeLifecycle};
pub use persistence::{PersistenceError, StatePersistence};
pub use selector::{select_entry_contracts, EntrySelection};
pub use service::LifecycleService;
pub use status::{LegSummary, LifecycleStatus};
pub use types::{
    Contract, EntryPlan, ExitReason, LegKind, LegSlot, LegState, PendingUnwind, TradeCycle,
    TradeState,
};

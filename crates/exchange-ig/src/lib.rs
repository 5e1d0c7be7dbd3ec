//! IG broker integration for the event strangle trader.
//!
//! This crate provides:
//! - A REST client that owns one authenticated session
//! - A background heartbeat that refreshes the access token at half its lifetime
//! - Transparent re-authentication and single replay on expired tokens
//! - Exponential backoff on transient failures via `strangle_core::retry`
//!
//! # API Endpoints
//!
//! - `POST /session` (v3) - Log in
//! - `POST /session/refresh-token` - Refresh the access token
//! - `PUT /session` - Switch account
//! - `DELETE /session` - Log out
//! - `GET /marketnavigation/{node}` - Browse the market tree
//! - `GET /markets?searchTerm=` - Search instruments
//! - `POST /positions/otc` (v2) - Open a position
//! - `POST /positions/otc` with `_method: DELETE` - Close a position
//! - `GET /confirms/{dealReference}` - Deal confirmation
//! - `GET /positions` (v2) - Open positions
//! - `GET /accounts` - Accounts and balances

pub mod client;
pub mod error;
pub mod session;
pub mod types;

pub use client::{IgClient, IgClientConfig, IG_DEMO_URL, IG_LIVE_URL};
pub use error::{IgError, Result};
pub use session::SessionState;
pub use types::{
    Account, Balance, ClosePositionRequest, DealConfirmation, DealStatus, Direction, MarketNode,
    MarketStatus, MarketSummary, Navigation, OpenPosition, OpenPositionRequest, PositionEntry,
};

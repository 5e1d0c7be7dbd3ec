//! Data models for the IG REST API.
//!
//! All financial values use `rust_decimal::Decimal`. Field names follow the
//! broker's camelCase JSON.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Types
// =============================================================================

/// OAuth token block returned by `POST /session` (v3) and the refresh call.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Token lifetime in seconds, sent as a string.
    pub expires_in: String,
}

impl OAuthToken {
    /// Lifetime in seconds; unparseable values fall back to 60.
    #[must_use]
    pub fn lifetime_secs(&self) -> u64 {
        self.expires_in.trim().parse().unwrap_or(60)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawSessionResponse {
    pub account_id: String,
    pub oauth_token: OAuthToken,
}

// =============================================================================
// Market Types
// =============================================================================

/// Tradeability of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Tradeable,
    Closed,
    EditsOnly,
    Offline,
    OnAuction,
    OnAuctionNoEdits,
    Suspended,
    #[serde(other)]
    Unknown,
}

/// A market snapshot as returned by navigation, search and position listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    pub epic: String,
    pub instrument_name: String,
    #[serde(default)]
    pub expiry: String,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub offer: Option<Decimal>,
    pub market_status: MarketStatus,
}

impl MarketSummary {
    /// True when the instrument can be dealt right now.
    #[must_use]
    pub fn is_tradeable(&self) -> bool {
        self.market_status == MarketStatus::Tradeable
    }

    /// Midpoint of bid and offer, when both are quoted.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.offer) {
            (Some(bid), Some(offer)) => Some((bid + offer) / Decimal::TWO),
            _ => None,
        }
    }
}

/// A child node in the market navigation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketNode {
    pub id: String,
    pub name: String,
}

/// One level of the market navigation tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Navigation {
    #[serde(default)]
    pub nodes: Option<Vec<MarketNode>>,
    #[serde(default)]
    pub markets: Option<Vec<MarketSummary>>,
}

impl Navigation {
    #[must_use]
    pub fn nodes(&self) -> &[MarketNode] {
        self.nodes.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn markets(&self) -> &[MarketSummary] {
        self.markets.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawSearchResponse {
    #[serde(default)]
    pub markets: Vec<MarketSummary>,
}

// =============================================================================
// Dealing Types
// =============================================================================

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

/// Request to open a limit-priced option position.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPositionRequest {
    pub epic: String,
    pub expiry: String,
    pub currency: String,
    pub size: Decimal,
    pub limit_level: Decimal,
}

/// Request to reduce or close an open position.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosePositionRequest {
    pub deal_id: String,
    pub size: Decimal,
    pub limit_level: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOpenPosition<'a> {
    pub epic: &'a str,
    pub expiry: &'a str,
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::float")]
    pub size: Decimal,
    pub order_type: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub level: Decimal,
    pub currency_code: &'a str,
    pub force_open: bool,
    pub guaranteed_stop: bool,
    pub time_in_force: &'static str,
}

impl<'a> From<&'a OpenPositionRequest> for RawOpenPosition<'a> {
    fn from(req: &'a OpenPositionRequest) -> Self {
        Self {
            epic: &req.epic,
            expiry: &req.expiry,
            direction: Direction::Buy,
            size: req.size,
            order_type: "LIMIT",
            level: req.limit_level,
            currency_code: &req.currency,
            force_open: true,
            guaranteed_stop: false,
            time_in_force: "FILL_OR_KILL",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawClosePosition<'a> {
    pub deal_id: &'a str,
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::float")]
    pub size: Decimal,
    pub order_type: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub level: Decimal,
    pub time_in_force: &'static str,
}

impl<'a> From<&'a ClosePositionRequest> for RawClosePosition<'a> {
    fn from(req: &'a ClosePositionRequest) -> Self {
        Self {
            deal_id: &req.deal_id,
            direction: Direction::Sell,
            size: req.size,
            order_type: "LIMIT",
            level: req.limit_level,
            time_in_force: "FILL_OR_KILL",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawDealReference {
    pub deal_reference: String,
}

/// Broker verdict on a submitted deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DealStatus {
    Accepted,
    Rejected,
    #[serde(other)]
    Unknown,
}

/// Fill confirmation for a deal reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealConfirmation {
    pub deal_reference: String,
    #[serde(default)]
    pub deal_id: Option<String>,
    pub deal_status: DealStatus,
    /// Position status after the deal (`OPEN`, `CLOSED`, `PARTIALLY_CLOSED`, ...).
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub level: Option<Decimal>,
    #[serde(default)]
    pub epic: Option<String>,
}

impl DealConfirmation {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.deal_status == DealStatus::Accepted
    }

    /// Rejection reason, or the raw status when none was given.
    #[must_use]
    pub fn rejection_reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| format!("{:?}", self.deal_status))
    }
}

// =============================================================================
// Position & Account Types
// =============================================================================

/// An open position as reported by `GET /positions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPosition {
    pub deal_id: String,
    #[serde(default)]
    pub deal_reference: Option<String>,
    pub size: Decimal,
    pub level: Decimal,
    pub direction: Direction,
    #[serde(default)]
    pub currency: Option<String>,
}

/// A position paired with its market snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub position: OpenPosition,
    pub market: MarketSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawPositionsResponse {
    #[serde(default)]
    pub positions: Vec<PositionEntry>,
}

/// Account balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub balance: Decimal,
    #[serde(default)]
    pub deposit: Decimal,
    #[serde(default)]
    pub profit_loss: Decimal,
    pub available: Decimal,
}

/// A trading account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    pub account_name: String,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub preferred: bool,
    pub currency: String,
    pub balance: Balance,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawAccountsResponse {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawErrorBody {
    pub error_code: String,
}

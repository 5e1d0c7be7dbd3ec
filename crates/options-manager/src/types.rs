//! Types for the strangle trade cycle.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strangle_ig::{DealConfirmation, MarketSummary};

// =============================================================================
// Legs & Contracts
// =============================================================================

/// One side of the strangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegKind {
    Put,
    Call,
}

impl LegKind {
    /// Both legs, in submission order.
    pub const BOTH: [LegKind; 2] = [LegKind::Put, LegKind::Call];

    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Put => Self::Call,
            Self::Call => Self::Put,
        }
    }
}

impl fmt::Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => write!(f, "put"),
            Self::Call => write!(f, "call"),
        }
    }
}

/// Immutable snapshot of a tradeable option. Replaced on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub epic: String,
    pub instrument_name: String,
    pub kind: LegKind,
    pub strike: Decimal,
    pub expiry: String,
    pub bid: Option<Decimal>,
    pub offer: Option<Decimal>,
    pub tradeable: bool,
}

impl Contract {
    /// Builds a contract from a market snapshot; `None` if the name does not
    /// describe a put or call with a strike.
    #[must_use]
    pub fn from_market(market: &MarketSummary) -> Option<Self> {
        let (strike, kind) = parse_option_name(&market.instrument_name)?;
        Some(Self {
            epic: market.epic.clone(),
            instrument_name: market.instrument_name.clone(),
            kind,
            strike,
            expiry: market.expiry.clone(),
            bid: market.bid,
            offer: market.offer,
            tradeable: market.is_tradeable(),
        })
    }

    /// Same contract with fresh quotes.
    #[must_use]
    pub fn with_quotes(&self, market: &MarketSummary) -> Self {
        Self {
            bid: market.bid,
            offer: market.offer,
            tradeable: market.is_tradeable(),
            ..self.clone()
        }
    }
}

/// Extracts `(strike, kind)` from names like `"US 500 5800 PUT"`.
///
/// The kind is the last `PUT`/`CALL` token; the strike is the last number
/// before it.
#[must_use]
pub fn parse_option_name(name: &str) -> Option<(Decimal, LegKind)> {
    let tokens: Vec<&str> = name.split_whitespace().collect();
    let kind_pos = tokens.iter().rposition(|t| {
        t.eq_ignore_ascii_case("put") || t.eq_ignore_ascii_case("call")
    })?;
    let kind = if tokens[kind_pos].eq_ignore_ascii_case("put") {
        LegKind::Put
    } else {
        LegKind::Call
    };

    let strike = tokens[..kind_pos]
        .iter()
        .rev()
        .find_map(|t| t.replace(',', "").parse::<Decimal>().ok())?;

    (strike > Decimal::ZERO).then_some((strike, kind))
}

// =============================================================================
// Leg State
// =============================================================================

/// An entry order submitted but not yet confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingLeg {
    pub deal_reference: String,
    pub contract: Contract,
    pub requested_size: Decimal,
    pub submitted_at: DateTime<Utc>,
}

/// A confirmed leg with a live (or fully exited) position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegState {
    pub kind: LegKind,
    pub deal_reference: String,
    pub deal_id: String,
    pub confirmation: DealConfirmation,
    /// Currently open size.
    pub size: Decimal,
    /// Size filled at entry.
    pub entry_size: Decimal,
    pub entry_level: Decimal,
    pub contract: Contract,
    /// Highest bid seen since the leg was confirmed.
    pub ath: Option<Decimal>,
    pub stop_part_sold: bool,
    pub tier2_part_sold: bool,
    pub tier3_part_sold: bool,
    /// Consecutive position refreshes that did not list this leg.
    #[serde(default)]
    pub missing_refreshes: u32,
}

impl LegState {
    /// Creates a confirmed leg; all one-shot flags start unset.
    #[must_use]
    pub fn new(
        kind: LegKind,
        pending: &PendingLeg,
        confirmation: DealConfirmation,
        deal_id: String,
        size: Decimal,
        entry_level: Decimal,
    ) -> Self {
        Self {
            kind,
            deal_reference: pending.deal_reference.clone(),
            deal_id,
            confirmation,
            size,
            entry_size: size,
            entry_level,
            contract: pending.contract.clone(),
            ath: None,
            stop_part_sold: false,
            tier2_part_sold: false,
            tier3_part_sold: false,
            missing_refreshes: 0,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.size > Decimal::ZERO
    }

    /// Current bid, if quoted.
    #[must_use]
    pub fn bid(&self) -> Option<Decimal> {
        self.contract.bid
    }

    /// Raises the all-time-high to the current bid.
    pub fn observe_bid(&mut self) {
        if let Some(bid) = self.contract.bid {
            self.ath = Some(self.ath.map_or(bid, |ath| ath.max(bid)));
        }
    }

    /// Bid relative to entry (2.0 = doubled).
    #[must_use]
    pub fn multiple(&self) -> Option<Decimal> {
        let bid = self.contract.bid?;
        (self.entry_level > Decimal::ZERO).then(|| bid / self.entry_level)
    }
}

/// Per-leg slot of the trade cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LegSlot {
    #[default]
    Empty,
    Submitted(PendingLeg),
    Confirmed(LegState),
}

impl LegSlot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[must_use]
    pub fn confirmed(&self) -> Option<&LegState> {
        match self {
            Self::Confirmed(leg) => Some(leg),
            _ => None,
        }
    }

    pub fn confirmed_mut(&mut self) -> Option<&mut LegState> {
        match self {
            Self::Confirmed(leg) => Some(leg),
            _ => None,
        }
    }

    /// Open size; zero unless confirmed.
    #[must_use]
    pub fn open_size(&self) -> Decimal {
        self.confirmed().map_or(Decimal::ZERO, |leg| leg.size)
    }

    /// The entry deal reference, once submitted.
    #[must_use]
    pub fn deal_reference(&self) -> Option<&str> {
        match self {
            Self::Empty => None,
            Self::Submitted(pending) => Some(&pending.deal_reference),
            Self::Confirmed(leg) => Some(&leg.deal_reference),
        }
    }
}

// =============================================================================
// Trade Cycle
// =============================================================================

/// Lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    #[default]
    Idle,
    Dealing,
    Position,
    Won,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Dealing => write!(f, "dealing"),
            Self::Position => write!(f, "position"),
            Self::Won => write!(f, "won"),
        }
    }
}

/// One leg of the entry plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedLeg {
    pub contract: Contract,
    pub limit_level: Decimal,
}

/// Contracts, size and limits chosen at entry; kept until both legs confirm
/// so a failed submission can be resent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub underlying_price: Decimal,
    pub size: Decimal,
    pub put: PlannedLeg,
    pub call: PlannedLeg,
    pub created_at: DateTime<Utc>,
}

impl EntryPlan {
    #[must_use]
    pub fn leg(&self, kind: LegKind) -> &PlannedLeg {
        match kind {
            LegKind::Put => &self.put,
            LegKind::Call => &self.call,
        }
    }
}

/// Opposite-leg sale owed after a tier-2 hit, kept until the broker accepts
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUnwind {
    pub leg: LegKind,
    pub size: Decimal,
}

/// The persisted aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeCycle {
    pub state: TradeState,
    #[serde(default)]
    pub put: LegSlot,
    #[serde(default)]
    pub call: LegSlot,
    #[serde(default)]
    pub plan: Option<EntryPlan>,
    /// Leg whose tier-3 hit forced the opposite leg closed.
    #[serde(default)]
    pub won_leg: Option<LegKind>,
    #[serde(default)]
    pub pending_unwind: Option<PendingUnwind>,
}

impl TradeCycle {
    #[must_use]
    pub fn leg(&self, kind: LegKind) -> &LegSlot {
        match kind {
            LegKind::Put => &self.put,
            LegKind::Call => &self.call,
        }
    }

    pub fn leg_mut(&mut self, kind: LegKind) -> &mut LegSlot {
        match kind {
            LegKind::Put => &mut self.put,
            LegKind::Call => &mut self.call,
        }
    }

    /// Summed open size across both legs.
    #[must_use]
    pub fn open_size(&self) -> Decimal {
        self.put.open_size() + self.call.open_size()
    }

    #[must_use]
    pub fn both_confirmed_live(&self) -> bool {
        LegKind::BOTH
            .iter()
            .all(|k| self.leg(*k).confirmed().is_some_and(LegState::is_live))
    }

    /// Discards both legs and returns to idle.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Checks the structural invariants of each state.
    ///
    /// # Errors
    /// Returns a description of the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.pending_unwind.is_some()
            && !matches!(self.state, TradeState::Position | TradeState::Won)
        {
            return Err(format!("{} cycle holds a pending unwind", self.state));
        }
        match self.state {
            TradeState::Idle => {
                if !self.put.is_empty() || !self.call.is_empty() {
                    return Err("idle cycle holds legs".to_string());
                }
            }
            TradeState::Dealing => {
                let missing = LegKind::BOTH.iter().any(|k| self.leg(*k).is_empty());
                if missing && self.plan.is_none() {
                    return Err("dealing cycle is missing a leg and has no entry plan".to_string());
                }
            }
            TradeState::Position | TradeState::Won => {
                if LegKind::BOTH
                    .iter()
                    .any(|k| self.leg(*k).confirmed().is_none())
                {
                    return Err(format!("{} cycle has an unconfirmed leg", self.state));
                }
                if self.state == TradeState::Won && self.won_leg.is_none() {
                    return Err("won cycle does not name the winning leg".to_string());
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Exit Actions
// =============================================================================

/// Why a leg is being reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    Tier2,
    Tier3,
    OppositeUnwind,
    OppositeClose,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StopLoss => "stop_loss",
            Self::TrailingStop => "trailing_stop",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
            Self::OppositeUnwind => "opposite_unwind",
            Self::OppositeClose => "opposite_close",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// A rule hit: sell `fraction` of the remaining size for `reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleHit {
    pub reason: ExitReason,
    pub fraction: Decimal,
}

//! Status snapshots for the control surface.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{LegKind, LegSlot, PendingUnwind, TradeCycle, TradeState};

/// One leg as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegSummary {
    pub kind: LegKind,
    /// `submitted` or `confirmed`.
    pub status: &'static str,
    pub epic: String,
    pub strike: Decimal,
    pub size: Decimal,
    pub entry_level: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ath: Option<Decimal>,
    pub stop_part_sold: bool,
    pub tier2_part_sold: bool,
    pub tier3_part_sold: bool,
}

impl LegSummary {
    #[must_use]
    pub fn from_slot(kind: LegKind, slot: &LegSlot) -> Option<Self> {
        match slot {
            LegSlot::Empty => None,
            LegSlot::Submitted(pending) => Some(Self {
                kind,
                status: "submitted",
                epic: pending.contract.epic.clone(),
                strike: pending.contract.strike,
                size: pending.requested_size,
                entry_level: None,
                bid: pending.contract.bid,
                ath: None,
                stop_part_sold: false,
                tier2_part_sold: false,
                tier3_part_sold: false,
            }),
            LegSlot::Confirmed(leg) => Some(Self {
                kind,
                status: "confirmed",
                epic: leg.contract.epic.clone(),
                strike: leg.contract.strike,
                size: leg.size,
                entry_level: Some(leg.entry_level),
                bid: leg.contract.bid,
                ath: leg.ath,
                stop_part_sold: leg.stop_part_sold,
                tier2_part_sold: leg.tier2_part_sold,
                tier3_part_sold: leg.tier3_part_sold,
            }),
        }
    }

    /// Current bid over entry, as a multiple.
    #[must_use]
    pub fn multiple(&self) -> Option<Decimal> {
        match (self.bid, self.entry_level) {
            (Some(bid), Some(entry)) if entry > Decimal::ZERO => Some(bid / entry),
            _ => None,
        }
    }
}

impl fmt::Display for LegSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} strike {} size {}",
            self.kind, self.status, self.epic, self.strike, self.size
        )?;
        if let Some(entry) = self.entry_level {
            write!(f, " entry {entry}")?;
        }
        if let Some(bid) = self.bid {
            write!(f, " bid {bid}")?;
        }
        if let Some(multiple) = self.multiple() {
            write!(f, " ({}x)", multiple.round_dp(2))?;
        }
        if let Some(ath) = self.ath {
            write!(f, " ath {ath}")?;
        }
        let flags: Vec<&str> = [
            (self.stop_part_sold, "stop"),
            (self.tier2_part_sold, "tier2"),
            (self.tier3_part_sold, "tier3"),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect();
        if !flags.is_empty() {
            write!(f, " sold [{}]", flags.join(", "))?;
        }
        Ok(())
    }
}

/// Point-in-time view of the lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleStatus {
    pub state: TradeState,
    pub put: Option<LegSummary>,
    pub call: Option<LegSummary>,
    pub won_leg: Option<LegKind>,
    pub pending_unwind: Option<PendingUnwind>,
    pub open_size: Decimal,
    pub event_time: Option<DateTime<Utc>>,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl LifecycleStatus {
    #[must_use]
    pub fn new(
        cycle: &TradeCycle,
        event_time: Option<DateTime<Utc>>,
        last_tick: Option<DateTime<Utc>>,
        last_error: Option<String>,
    ) -> Self {
        Self {
            state: cycle.state,
            put: LegSummary::from_slot(LegKind::Put, &cycle.put),
            call: LegSummary::from_slot(LegKind::Call, &cycle.call),
            won_leg: cycle.won_leg,
            pending_unwind: cycle.pending_unwind,
            open_size: cycle.open_size(),
            event_time,
            last_tick,
            last_error,
        }
    }

    /// Multi-line explanation of what the lifecycle is doing and why.
    #[must_use]
    pub fn explain(&self) -> String {
        let mut lines = Vec::new();
        lines.push(match self.state {
            TradeState::Idle => match self.event_time {
                Some(at) => format!("Idle: waiting for the event at {at}"),
                None => "Idle: no event scheduled".to_string(),
            },
            TradeState::Dealing => "Dealing: entry orders submitted, awaiting fills".to_string(),
            TradeState::Position => {
                format!("Position: managing exits, open size {}", self.open_size)
            }
            TradeState::Won => match self.won_leg {
                Some(winner) => format!(
                    "Won: {winner} crossed tier 3, closing the {} leg, open size {}",
                    winner.opposite(),
                    self.open_size
                ),
                None => format!("Won: closing the losing leg, open size {}", self.open_size),
            },
        });
        if let Some(remainder) = self.won_remainder() {
            lines.push(remainder);
        }
        if let Some(unwind) = self.pending_unwind {
            lines.push(format!(
                "Owed: {} unwind of {}, retried every tick",
                unwind.leg, unwind.size
            ));
        }
        for leg in [&self.put, &self.call].into_iter().flatten() {
            lines.push(format!("  {leg}"));
        }
        if let Some(at) = self.last_tick {
            lines.push(format!("Last tick: {at}"));
        }
        if let Some(error) = &self.last_error {
            lines.push(format!("Last error: {error}"));
        }
        lines.join("\n")
    }

    /// What still watches the winning leg once the cycle is won.
    fn won_remainder(&self) -> Option<String> {
        let winner = self.won_leg?;
        let leg = match winner {
            LegKind::Put => self.put.as_ref(),
            LegKind::Call => self.call.as_ref(),
        }?;
        if self.state != TradeState::Won || leg.size <= Decimal::ZERO {
            return None;
        }
        Some(if leg.stop_part_sold {
            format!(
                "{winner} remainder {} has no automatic exit left; close it by hand or let it expire",
                leg.size
            )
        } else {
            format!("{winner} remainder {} is held under its trailing stop", leg.size)
        })
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)?;
        for leg in [&self.put, &self.call].into_iter().flatten() {
            write!(f, " | {leg}")?;
        }
        Ok(())
    }
}

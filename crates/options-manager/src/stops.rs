//! Stop-loss and trailing stop rules.

use rust_decimal::Decimal;
use strangle_core::RiskParameters;

use crate::types::{ExitReason, LegState, RuleHit};

/// Check all stop rules against a leg. Returns a hit if triggered.
///
/// Both rules share the stop flag, so at most one of them ever fires per
/// cycle.
pub fn check_stop_rules(leg: &LegState, bid: Decimal, params: &RiskParameters) -> Option<RuleHit> {
    if leg.stop_part_sold {
        return None;
    }

    // 1. Stop-loss against the entry level
    if let Some(hit) = check_stop_loss(leg, bid, params) {
        return Some(hit);
    }

    // 2. Trailing stop against the all-time-high, armed by tier 2
    check_trailing_stop(leg, bid, params)
}

fn check_stop_loss(leg: &LegState, bid: Decimal, params: &RiskParameters) -> Option<RuleHit> {
    let trigger = leg.entry_level * (Decimal::ONE - params.stop_fraction);
    if bid <= trigger {
        tracing::warn!(
            leg = %leg.kind,
            bid = %bid,
            entry = %leg.entry_level,
            trigger = %trigger,
            "Stop-loss triggered"
        );
        return Some(RuleHit {
            reason: ExitReason::StopLoss,
            fraction: params.stop_exit_fraction,
        });
    }
    None
}

fn check_trailing_stop(leg: &LegState, bid: Decimal, params: &RiskParameters) -> Option<RuleHit> {
    if !leg.tier2_part_sold {
        return None;
    }
    let ath = leg.ath?;
    let trigger = ath * (Decimal::ONE - params.trailing_fraction);
    if bid <= trigger {
        tracing::warn!(
            leg = %leg.kind,
            bid = %bid,
            ath = %ath,
            trigger = %trigger,
            "Trailing stop triggered"
        );
        return Some(RuleHit {
            reason: ExitReason::TrailingStop,
            fraction: params.stop_exit_fraction,
        });
    }
    None
}

//! Risk/exit rule engine: one evaluation per live leg per tick.

use strangle_core::RiskParameters;

use crate::error::TradingError;
use crate::stops;
use crate::targets;
use crate::types::{LegState, RuleHit};

/// Evaluates the exit rules for a leg in priority order: stop-loss, trailing
/// stop, tier 2, tier 3. The first rule that fires wins the tick.
///
/// Returns `Ok(None)` when the leg has no bid this tick.
///
/// # Errors
/// Returns `TradingError::Invariant` when called on a leg with no live
/// position or no entry level.
pub fn evaluate_leg(
    leg: &LegState,
    params: &RiskParameters,
) -> Result<Option<RuleHit>, TradingError> {
    if !leg.is_live() {
        return Err(TradingError::invariant(format!(
            "exit rules evaluated on {} leg with no live position",
            leg.kind
        )));
    }
    if leg.entry_level <= rust_decimal::Decimal::ZERO {
        return Err(TradingError::invariant(format!(
            "{} leg has no entry level",
            leg.kind
        )));
    }

    let Some(bid) = leg.bid() else {
        tracing::debug!(leg = %leg.kind, "No bid, skipping rule evaluation");
        return Ok(None);
    };

    Ok(stops::check_stop_rules(leg, bid, params)
        .or_else(|| targets::check_profit_targets(leg, bid, params)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::leg_at;
    use crate::types::ExitReason;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn with_bid(bid: Decimal) -> LegState {
        let mut leg = leg_at(dec!(10), dec!(10));
        leg.contract.bid = Some(bid);
        leg
    }

    #[test]
    fn quiet_market_fires_nothing() {
        let params = RiskParameters::default();
        assert_eq!(evaluate_leg(&with_bid(dec!(12)), &params).unwrap(), None);
    }

    #[test]
    fn stop_outranks_targets() {
        let params = RiskParameters::default();
        let hit = evaluate_leg(&with_bid(dec!(4)), &params).unwrap().unwrap();
        assert_eq!(hit.reason, ExitReason::StopLoss);

        let hit = evaluate_leg(&with_bid(dec!(25)), &params).unwrap().unwrap();
        assert_eq!(hit.reason, ExitReason::Tier2);
    }

    #[test]
    fn flat_leg_is_an_invariant_violation() {
        let params = RiskParameters::default();
        let mut leg = with_bid(dec!(4));
        leg.size = Decimal::ZERO;
        assert!(matches!(
            evaluate_leg(&leg, &params),
            Err(TradingError::Invariant(_))
        ));
    }

    #[test]
    fn missing_bid_is_skipped() {
        let params = RiskParameters::default();
        let mut leg = with_bid(dec!(4));
        leg.contract.bid = None;
        assert_eq!(evaluate_leg(&leg, &params).unwrap(), None);
    }

    #[test]
    fn each_flag_fires_once() {
        let params = RiskParameters::default();
        let mut leg = with_bid(dec!(25));
        let mut fired = Vec::new();

        for bid in [dec!(25), dec!(25), dec!(35), dec!(35), dec!(20), dec!(4), dec!(4)] {
            leg.contract.bid = Some(bid);
            leg.observe_bid();
            if let Some(hit) = evaluate_leg(&leg, &params).unwrap() {
                match hit.reason {
                    ExitReason::StopLoss | ExitReason::TrailingStop => leg.stop_part_sold = true,
                    ExitReason::Tier2 => leg.tier2_part_sold = true,
                    ExitReason::Tier3 => leg.tier3_part_sold = true,
                    _ => {}
                }
                fired.push(hit.reason);
            }
        }

        assert_eq!(
            fired,
            vec![ExitReason::Tier2, ExitReason::Tier3, ExitReason::TrailingStop]
        );
    }
}

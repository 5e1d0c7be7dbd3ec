//! Profit tiers: staged profit-taking at multiples of the entry level.

use rust_decimal::Decimal;
use strangle_core::RiskParameters;

use crate::types::{ExitReason, LegState, RuleHit};

/// Check profit tiers. Returns a hit if a tier is crossed.
///
/// Both comparisons are strict: a bid of exactly `multiple × entry` does not
/// fire.
pub fn check_profit_targets(
    leg: &LegState,
    bid: Decimal,
    params: &RiskParameters,
) -> Option<RuleHit> {
    if leg.entry_level <= Decimal::ZERO {
        return None;
    }
    let multiple = bid / leg.entry_level;

    // Tier 2: first profit-take, arms the trailing stop
    if !leg.tier2_part_sold && multiple > params.tier2_multiple {
        tracing::info!(
            leg = %leg.kind,
            bid = %bid,
            multiple = %multiple.round_dp(4),
            "Profit tier 2 hit"
        );
        return Some(RuleHit {
            reason: ExitReason::Tier2,
            fraction: params.tier2_exit_fraction,
        });
    }

    // Tier 3
    if !leg.tier3_part_sold && multiple > params.tier3_multiple {
        tracing::info!(
            leg = %leg.kind,
            bid = %bid,
            multiple = %multiple.round_dp(4),
            "Profit tier 3 hit"
        );
        return Some(RuleHit {
            reason: ExitReason::Tier3,
            fraction: params.tier3_exit_fraction,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::leg_at;
    use rust_decimal_macros::dec;

    #[test]
    fn tier2_is_strict() {
        let params = RiskParameters::default(); // tier 2 at 2x
        let leg = leg_at(dec!(10), dec!(10));

        let hit = check_profit_targets(&leg, dec!(20.01), &params).unwrap();
        assert_eq!(hit.reason, ExitReason::Tier2);
        assert_eq!(hit.fraction, params.tier2_exit_fraction);

        assert!(check_profit_targets(&leg, dec!(20.0), &params).is_none());
    }

    #[test]
    fn tier2_comes_before_tier3() {
        let params = RiskParameters::default();
        let mut leg = leg_at(dec!(10), dec!(10));

        let hit = check_profit_targets(&leg, dec!(35), &params).unwrap();
        assert_eq!(hit.reason, ExitReason::Tier2);

        leg.tier2_part_sold = true;
        let hit = check_profit_targets(&leg, dec!(35), &params).unwrap();
        assert_eq!(hit.reason, ExitReason::Tier3);

        leg.tier3_part_sold = true;
        assert!(check_profit_targets(&leg, dec!(100), &params).is_none());
    }

    #[test]
    fn tier3_is_strict() {
        let params = RiskParameters::default(); // tier 3 at 3x
        let mut leg = leg_at(dec!(10), dec!(10));
        leg.tier2_part_sold = true;
        assert!(check_profit_targets(&leg, dec!(30), &params).is_none());
        assert!(check_profit_targets(&leg, dec!(30.01), &params).is_some());
    }
}

//! Refreshes confirmed legs from the broker's position list.

use std::collections::HashMap;

use rust_decimal::Decimal;
use strangle_ig::PositionEntry;
use tracing::{debug, info, warn};

use crate::types::TradeCycle;

/// Updates each confirmed leg's open size and contract snapshot from
/// `positions`, matched by deal reference (falling back to deal id), and
/// raises its all-time-high from the fresh bid.
///
/// The position list can lag a fresh fill, so a leg only counts as fully
/// exited once it has been missing from `missing_limit` consecutive refreshes.
pub fn refresh_legs(cycle: &mut TradeCycle, positions: &[PositionEntry], missing_limit: u32) {
    let by_reference: HashMap<&str, &PositionEntry> = positions
        .iter()
        .filter_map(|p| p.position.deal_reference.as_deref().map(|r| (r, p)))
        .collect();
    let by_deal_id: HashMap<&str, &PositionEntry> = positions
        .iter()
        .map(|p| (p.position.deal_id.as_str(), p))
        .collect();

    for slot in [&mut cycle.put, &mut cycle.call] {
        let Some(leg) = slot.confirmed_mut() else {
            continue;
        };

        let entry = by_reference
            .get(leg.deal_reference.as_str())
            .or_else(|| by_deal_id.get(leg.deal_id.as_str()));

        match entry {
            Some(entry) => {
                leg.missing_refreshes = 0;
                leg.size = entry.position.size;
                leg.contract = leg.contract.with_quotes(&entry.market);
                leg.observe_bid();
                debug!(
                    leg = %leg.kind,
                    size = %leg.size,
                    bid = ?leg.contract.bid,
                    ath = ?leg.ath,
                    "Leg refreshed"
                );
            }
            None if leg.size > Decimal::ZERO => {
                leg.missing_refreshes += 1;
                if leg.missing_refreshes >= missing_limit {
                    info!(
                        leg = %leg.kind,
                        deal_id = %leg.deal_id,
                        refreshes = leg.missing_refreshes,
                        "Position no longer open"
                    );
                    leg.size = Decimal::ZERO;
                } else {
                    warn!(
                        leg = %leg.kind,
                        deal_id = %leg.deal_id,
                        refreshes = leg.missing_refreshes,
                        "Position missing from broker list"
                    );
                }
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::leg_at;
    use crate::types::{LegKind, LegSlot, TradeState};
    use rust_decimal_macros::dec;
    use strangle_ig::{Direction, MarketStatus, MarketSummary, OpenPosition};

    fn entry(reference: &str, size: Decimal, bid: Decimal) -> PositionEntry {
        PositionEntry {
            position: OpenPosition {
                deal_id: format!("DEAL-{reference}"),
                deal_reference: Some(reference.to_string()),
                size,
                level: dec!(2),
                direction: Direction::Buy,
                currency: None,
            },
            market: MarketSummary {
                epic: "OP.D.SPX.5800P.IP".to_string(),
                instrument_name: "US 500 5800 PUT".to_string(),
                expiry: "DFB".to_string(),
                bid: Some(bid),
                offer: Some(bid + dec!(0.2)),
                market_status: MarketStatus::Tradeable,
            },
        }
    }

    fn cycle() -> TradeCycle {
        let mut call = leg_at(dec!(2), dec!(25));
        call.kind = LegKind::Call;
        call.deal_reference = "REF-CALL".to_string();
        call.deal_id = "DEAL-CALL".to_string();
        TradeCycle {
            state: TradeState::Position,
            put: LegSlot::Confirmed(leg_at(dec!(2), dec!(25))),
            call: LegSlot::Confirmed(call),
            plan: None,
            won_leg: None,
            pending_unwind: None,
        }
    }

    #[test]
    fn updates_size_quotes_and_ath() {
        let mut cycle = cycle();
        refresh_legs(
            &mut cycle,
            &[entry("REF-PUT", dec!(20), dec!(3)), entry("REF-CALL", dec!(25), dec!(1))],
            3,
        );

        let put = cycle.put.confirmed().unwrap();
        assert_eq!(put.size, dec!(20));
        assert_eq!(put.contract.bid, Some(dec!(3)));
        assert_eq!(put.ath, Some(dec!(3)));

        refresh_legs(&mut cycle, &[entry("REF-PUT", dec!(20), dec!(2.5))], 3);
        let put = cycle.put.confirmed().unwrap();
        assert_eq!(put.ath, Some(dec!(3)));
        assert_eq!(put.contract.bid, Some(dec!(2.5)));
    }

    #[test]
    fn missing_position_means_flat_after_limit() {
        let mut cycle = cycle();
        refresh_legs(&mut cycle, &[entry("REF-PUT", dec!(25), dec!(2))], 2);
        assert_eq!(cycle.call.open_size(), dec!(25));
        assert_eq!(cycle.call.confirmed().unwrap().missing_refreshes, 1);

        refresh_legs(&mut cycle, &[entry("REF-PUT", dec!(25), dec!(2))], 2);
        assert_eq!(cycle.call.open_size(), Decimal::ZERO);
        assert_eq!(cycle.put.open_size(), dec!(25));

        refresh_legs(&mut cycle, &[], 1);
        assert_eq!(cycle.open_size(), Decimal::ZERO);
    }

    #[test]
    fn lagging_position_list_keeps_the_leg() {
        let mut cycle = cycle();
        let both = [entry("REF-PUT", dec!(25), dec!(2)), entry("REF-CALL", dec!(25), dec!(2))];

        // One refresh without the call, then it shows up again.
        refresh_legs(&mut cycle, &both[..1], 2);
        refresh_legs(&mut cycle, &both, 2);
        let call = cycle.call.confirmed().unwrap();
        assert_eq!(call.size, dec!(25));
        assert_eq!(call.missing_refreshes, 0);

        // The counter restarted, so one more miss is still tolerated.
        refresh_legs(&mut cycle, &both[..1], 2);
        assert_eq!(cycle.call.open_size(), dec!(25));
    }
}

//! Submits entry and exit orders and resolves their confirmations.

use chrono::Utc;
use rust_decimal::Decimal;
use strangle_ig::{ClosePositionRequest, OpenPositionRequest};
use tracing::{info, warn};

use crate::allocation;
use crate::broker::BrokerApi;
use crate::error::TradingError;
use crate::types::{ExitReason, LegKind, LegState, PendingLeg, PlannedLeg};

/// Result of confirming an entry.
#[derive(Debug)]
pub enum EntryOutcome {
    /// The leg is live.
    Filled(Box<LegState>),
    /// The broker refused the order; the reason is logged.
    Rejected(String),
}

/// Submits a buy for one planned leg; the leg is pending until confirmed.
///
/// # Errors
/// Returns error if the broker call fails.
pub async fn submit_entry<B: BrokerApi + ?Sized>(
    broker: &B,
    kind: LegKind,
    planned: &PlannedLeg,
    size: Decimal,
    currency: &str,
) -> Result<PendingLeg, TradingError> {
    let order = OpenPositionRequest {
        epic: planned.contract.epic.clone(),
        expiry: planned.contract.expiry.clone(),
        currency: currency.to_string(),
        size,
        limit_level: planned.limit_level,
    };
    let deal_reference = broker.open_position(&order).await?;

    info!(
        leg = %kind,
        epic = %order.epic,
        strike = %planned.contract.strike,
        size = %size,
        limit = %planned.limit_level,
        deal_reference = %deal_reference,
        "Entry submitted"
    );

    Ok(PendingLeg {
        deal_reference,
        contract: planned.contract.clone(),
        requested_size: size,
        submitted_at: Utc::now(),
    })
}

/// Requests the confirmation for a pending entry.
///
/// # Errors
/// Returns error if the broker call fails, or if an accepted confirmation
/// carries no deal id.
pub async fn confirm_entry<B: BrokerApi + ?Sized>(
    broker: &B,
    kind: LegKind,
    pending: &PendingLeg,
) -> Result<EntryOutcome, TradingError> {
    let confirmation = broker.confirm_deal(&pending.deal_reference).await?;

    if !confirmation.is_accepted() {
        let reason = confirmation.rejection_reason();
        warn!(
            leg = %kind,
            deal_reference = %pending.deal_reference,
            reason = %reason,
            "Entry not accepted"
        );
        return Ok(EntryOutcome::Rejected(reason));
    }

    let deal_id = confirmation.deal_id.clone().ok_or_else(|| {
        TradingError::invariant(format!(
            "accepted {kind} confirmation {} has no deal id",
            pending.deal_reference
        ))
    })?;
    let size = confirmation.size.unwrap_or(pending.requested_size);
    let level = confirmation
        .level
        .or(pending.contract.offer)
        .unwrap_or_default();

    info!(
        leg = %kind,
        deal_id = %deal_id,
        size = %size,
        level = %level,
        "Entry confirmed"
    );

    Ok(EntryOutcome::Filled(Box::new(LegState::new(
        kind,
        pending,
        confirmation,
        deal_id,
        size,
        level,
    ))))
}

/// Sells `size` of a leg at half the current bid and waits for the
/// confirmation. Returns the size actually closed.
///
/// # Errors
/// Returns `TradingError::DealRejected` if the exit is not accepted, or any
/// broker error.
pub async fn execute_exit<B: BrokerApi + ?Sized>(
    broker: &B,
    leg: &LegState,
    size: Decimal,
    reason: ExitReason,
) -> Result<Decimal, TradingError> {
    let bid = leg.bid().unwrap_or_default();
    let order = ClosePositionRequest {
        deal_id: leg.deal_id.clone(),
        size,
        limit_level: allocation::exit_limit(bid),
    };
    let deal_reference = broker.close_position(&order).await?;
    let confirmation = broker.confirm_deal(&deal_reference).await?;

    if !confirmation.is_accepted() {
        return Err(TradingError::DealRejected {
            leg: leg.kind,
            deal_reference,
            reason: confirmation.rejection_reason(),
        });
    }

    let closed = confirmation.size.unwrap_or(size).min(leg.size);
    info!(
        leg = %leg.kind,
        reason = %reason,
        size = %closed,
        bid = %bid,
        remaining = %(leg.size - closed),
        "Exit filled"
    );
    Ok(closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{leg_at, FakeBroker};
    use crate::types::Contract;
    use rust_decimal_macros::dec;

    fn planned(epic: &str) -> PlannedLeg {
        PlannedLeg {
            contract: Contract {
                epic: epic.to_string(),
                instrument_name: "US 500 94 PUT".to_string(),
                kind: LegKind::Put,
                strike: dec!(94),
                expiry: "DFB".to_string(),
                bid: Some(dec!(1.9)),
                offer: Some(dec!(2)),
                tradeable: true,
            },
            limit_level: dec!(4),
        }
    }

    #[tokio::test]
    async fn entry_fills_at_offer() {
        let broker = FakeBroker::with_chain();
        let pending = submit_entry(&broker, LegKind::Put, &planned("P94"), dec!(25), "USD")
            .await
            .unwrap();

        let opens = broker.opens();
        assert_eq!(opens.len(), 1);
        assert_eq!(opens[0].limit_level, dec!(4));
        assert_eq!(opens[0].currency, "USD");

        let EntryOutcome::Filled(leg) = confirm_entry(&broker, LegKind::Put, &pending)
            .await
            .unwrap()
        else {
            panic!("expected fill");
        };
        assert_eq!(leg.size, dec!(25));
        assert_eq!(leg.entry_level, dec!(2));
        assert_eq!(leg.ath, None);
        assert!(!leg.stop_part_sold);
    }

    #[tokio::test]
    async fn rejected_entry_is_not_an_error() {
        let broker = FakeBroker::with_chain();
        broker.reject_opens_for("P94");
        let pending = submit_entry(&broker, LegKind::Put, &planned("P94"), dec!(25), "USD")
            .await
            .unwrap();

        let outcome = confirm_entry(&broker, LegKind::Put, &pending).await.unwrap();
        assert!(matches!(outcome, EntryOutcome::Rejected(reason) if reason == "MARKET_CLOSED"));
    }

    #[tokio::test]
    async fn exit_reports_closed_size() {
        let broker = FakeBroker::default();
        let leg = leg_at(dec!(10), dec!(10));

        let closed = execute_exit(&broker, &leg, dec!(4), ExitReason::StopLoss)
            .await
            .unwrap();
        assert_eq!(closed, dec!(4));
        assert_eq!(broker.closes()[0].limit_level, dec!(5));
    }

    #[tokio::test]
    async fn rejected_exit_is_an_error() {
        let broker = FakeBroker::default();
        broker.reject_closes(true);
        let leg = leg_at(dec!(10), dec!(10));

        let err = execute_exit(&broker, &leg, dec!(4), ExitReason::Tier2)
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::DealRejected { leg: LegKind::Put, .. }));
    }
}

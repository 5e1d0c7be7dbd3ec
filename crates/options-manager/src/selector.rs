//! Contract selection: nearest-strike put and call around the underlying.
//!
//! Pure functions; the caller supplies the chain and the price.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use strangle_ig::MarketSummary;

use crate::error::TradingError;
use crate::types::{Contract, LegKind};

/// The put and call chosen for entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySelection {
    pub put: Contract,
    pub call: Contract,
}

impl EntrySelection {
    /// Combined offer of both legs, i.e. the premium for one unit of size.
    #[must_use]
    pub fn premium(&self) -> Decimal {
        self.put.offer.unwrap_or_default() + self.call.offer.unwrap_or_default()
    }
}

/// Picks the put and call nearest to `price - delta` and `price + delta`.
///
/// Puts are drawn only from strikes strictly below `price`, calls only from
/// strikes strictly above. Contracts must be tradeable with a positive offer.
///
/// # Errors
/// Returns `TradingError::NoContract` naming the first leg that has no
/// eligible contract; no partial selection is returned.
pub fn select_entry_contracts(
    contracts: &[Contract],
    price: Decimal,
    delta: Decimal,
) -> Result<EntrySelection, TradingError> {
    let put = select_leg(contracts, LegKind::Put, price, delta)?;
    let call = select_leg(contracts, LegKind::Call, price, delta)?;
    Ok(EntrySelection {
        put: put.clone(),
        call: call.clone(),
    })
}

/// Nearest eligible contract for one leg.
///
/// Ties on distance go to the contract further out of the money, then to the
/// lexically smaller epic, so the result never depends on input order.
pub fn select_leg(
    contracts: &[Contract],
    kind: LegKind,
    price: Decimal,
    delta: Decimal,
) -> Result<&Contract, TradingError> {
    let target = match kind {
        LegKind::Put => price - delta,
        LegKind::Call => price + delta,
    };

    contracts
        .iter()
        .filter(|c| c.kind == kind && is_eligible(c))
        .filter(|c| match kind {
            LegKind::Put => c.strike < price,
            LegKind::Call => c.strike > price,
        })
        .min_by(|a, b| {
            let by_distance = (a.strike - target).abs().cmp(&(b.strike - target).abs());
            let by_moneyness = match kind {
                LegKind::Put => a.strike.cmp(&b.strike),
                LegKind::Call => b.strike.cmp(&a.strike),
            };
            by_distance
                .then(by_moneyness)
                .then_with(|| a.epic.cmp(&b.epic))
        })
        .ok_or(TradingError::NoContract {
            leg: kind,
            price,
            delta,
        })
}

fn is_eligible(contract: &Contract) -> bool {
    contract.tradeable && contract.offer.is_some_and(|o| o > Decimal::ZERO)
}

/// Mid price of the underlying: the average of bid/offer mids across every
/// quoted search result.
///
/// # Errors
/// Returns `TradingError::NoQuote` if no result carries both bid and offer.
pub fn underlying_mid(markets: &[MarketSummary], term: &str) -> Result<Decimal, TradingError> {
    let mids: Vec<Decimal> = markets.iter().filter_map(MarketSummary::mid).collect();
    if mids.is_empty() {
        return Err(TradingError::NoQuote(term.to_string()));
    }
    let sum: Decimal = mids.iter().sum();
    Ok(sum / Decimal::from(mids.len()))
}

/// Orders contracts by kind then strike, for display.
pub fn sort_chain(contracts: &mut [Contract]) {
    contracts.sort_by(|a, b| match (a.kind, b.kind) {
        (LegKind::Put, LegKind::Call) => Ordering::Less,
        (LegKind::Call, LegKind::Put) => Ordering::Greater,
        _ => a.strike.cmp(&b.strike),
    });
}

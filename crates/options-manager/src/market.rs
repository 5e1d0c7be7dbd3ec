//! Option chain and underlying price lookups.

use std::collections::{HashSet, VecDeque};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::broker::BrokerApi;
use crate::error::TradingError;
use crate::selector;
use crate::types::Contract;

/// Expiry format used by the broker (`20-OCT-26`).
const EXPIRY_FORMAT: &str = "%d-%b-%y";

/// Walks the navigation tree below `node_id` (breadth first, at most
/// `max_depth` levels) and returns the option contracts expiring soonest on
/// or after `today`.
///
/// # Errors
/// Returns error if a navigation call fails.
pub async fn fetch_option_chain<B: BrokerApi + ?Sized>(
    broker: &B,
    node_id: &str,
    max_depth: u32,
    today: NaiveDate,
) -> Result<Vec<Contract>, TradingError> {
    let mut queue = VecDeque::from([(node_id.to_string(), 0u32)]);
    let mut visited = HashSet::new();
    let mut contracts = Vec::new();

    while let Some((node, depth)) = queue.pop_front() {
        if !visited.insert(node.clone()) {
            continue;
        }
        let navigation = broker.navigate_markets(Some(&node)).await?;
        contracts.extend(navigation.markets().iter().filter_map(Contract::from_market));

        if depth + 1 < max_depth {
            for child in navigation.nodes() {
                queue.push_back((child.id.clone(), depth + 1));
            }
        }
    }

    let chain = nearest_expiry(contracts, today);
    info!(node = node_id, contracts = chain.len(), "Option chain loaded");
    Ok(chain)
}

/// Keeps only contracts of the earliest expiry on or after `today`.
///
/// Contracts whose expiry cannot be parsed are kept only if no expiry parses
/// at all (daily chains sometimes carry no date).
#[must_use]
pub fn nearest_expiry(contracts: Vec<Contract>, today: NaiveDate) -> Vec<Contract> {
    let nearest = contracts
        .iter()
        .filter_map(|c| parse_expiry(&c.expiry))
        .filter(|d| *d >= today)
        .min();

    match nearest {
        Some(date) => contracts
            .into_iter()
            .filter(|c| parse_expiry(&c.expiry) == Some(date))
            .collect(),
        None => {
            debug!("No dated expiries in chain, keeping all contracts");
            contracts
                .into_iter()
                .filter(|c| parse_expiry(&c.expiry).is_none())
                .collect()
        }
    }
}

fn parse_expiry(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), EXPIRY_FORMAT).ok()
}

/// Mid price of the underlying from a search.
///
/// # Errors
/// Returns error if the search fails or nothing is quoted.
pub async fn fetch_underlying_price<B: BrokerApi + ?Sized>(
    broker: &B,
    term: &str,
) -> Result<Decimal, TradingError> {
    let markets = broker.search_markets(term).await?;
    let price = selector::underlying_mid(&markets, term)?;
    debug!(term, price = %price, quotes = markets.len(), "Underlying priced");
    Ok(price)
}

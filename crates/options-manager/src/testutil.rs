//! Fixtures shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use strangle_ig::{
    Account, Balance, ClosePositionRequest, DealConfirmation, DealStatus, Direction, IgError,
    MarketStatus, MarketSummary, Navigation, OpenPosition, OpenPositionRequest, PositionEntry,
    Result,
};
use tokio::sync::Semaphore;

use crate::broker::BrokerApi;
use crate::types::{Contract, LegKind, LegState, PendingLeg};

/// A confirmed put leg with the given entry level and size.
pub fn leg_at(entry: Decimal, size: Decimal) -> LegState {
    let contract = Contract {
        epic: "OP.D.SPX.5800P.IP".to_string(),
        instrument_name: "US 500 5800 PUT".to_string(),
        kind: LegKind::Put,
        strike: dec!(5800),
        expiry: "DFB".to_string(),
        bid: Some(entry),
        offer: Some(entry + dec!(0.2)),
        tradeable: true,
    };
    let pending = PendingLeg {
        deal_reference: "REF-PUT".to_string(),
        contract,
        requested_size: size,
        submitted_at: Utc::now(),
    };
    let confirmation = DealConfirmation {
        deal_reference: "REF-PUT".to_string(),
        deal_id: Some("DEAL-PUT".to_string()),
        deal_status: DealStatus::Accepted,
        status: Some("OPEN".to_string()),
        reason: None,
        direction: Some(Direction::Buy),
        size: Some(size),
        level: Some(entry),
        epic: Some("OP.D.SPX.5800P.IP".to_string()),
    };
    LegState::new(
        LegKind::Put,
        &pending,
        confirmation,
        "DEAL-PUT".to_string(),
        size,
        entry,
    )
}

struct FakePosition {
    deal_id: String,
    deal_reference: String,
    epic: String,
    size: Decimal,
    level: Decimal,
}

#[derive(Default)]
struct FakeState {
    navigation: HashMap<String, Navigation>,
    underlying: Vec<MarketSummary>,
    quotes: HashMap<String, (Option<Decimal>, Option<Decimal>)>,
    positions: Vec<FakePosition>,
    confirms: HashMap<String, DealConfirmation>,
    opens: Vec<OpenPositionRequest>,
    closes: Vec<ClosePositionRequest>,
    fail_opens: HashSet<String>,
    reject_opens: HashSet<String>,
    reject_closes: bool,
    fail_closes: HashSet<String>,
    hide_positions: bool,
    next_ref: u32,
    logouts: u32,
}

/// In-memory broker: fills entries at the quoted offer and exits at any size.
#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<FakeState>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

fn summary(epic: &str, name: &str, bid: Option<Decimal>, offer: Option<Decimal>) -> MarketSummary {
    MarketSummary {
        epic: epic.to_string(),
        instrument_name: name.to_string(),
        expiry: "DFB".to_string(),
        bid,
        offer,
        market_status: MarketStatus::Tradeable,
    }
}

fn confirmation(reference: &str, status: DealStatus, deal_id: Option<&str>) -> DealConfirmation {
    DealConfirmation {
        deal_reference: reference.to_string(),
        deal_id: deal_id.map(str::to_string),
        deal_status: status,
        status: None,
        reason: (status == DealStatus::Rejected).then(|| "MARKET_CLOSED".to_string()),
        direction: None,
        size: None,
        level: None,
        epic: None,
    }
}

impl FakeBroker {
    /// Underlying at 100 with puts at 90/94/99 and calls at 101/106/110 under
    /// node `root`. The 94 put and 106 call are offered at 2.
    pub fn with_chain() -> Self {
        let broker = Self::default();
        broker.set_underlying(dec!(99.5), dec!(100.5));
        let strikes = [
            ("P90", "US 500 90 PUT", dec!(1)),
            ("P94", "US 500 94 PUT", dec!(2)),
            ("P99", "US 500 99 PUT", dec!(4)),
            ("C101", "US 500 101 CALL", dec!(4)),
            ("C106", "US 500 106 CALL", dec!(2)),
            ("C110", "US 500 110 CALL", dec!(1)),
        ];
        let markets = strikes
            .iter()
            .map(|(epic, name, offer)| {
                broker.set_quote(epic, Some(*offer - dec!(0.1)), Some(*offer));
                summary(epic, name, Some(*offer - dec!(0.1)), Some(*offer))
            })
            .collect();
        broker.set_navigation(
            "root",
            Navigation {
                nodes: None,
                markets: Some(markets),
            },
        );
        broker
    }

    pub fn set_navigation(&self, node: &str, navigation: Navigation) {
        self.state
            .lock()
            .navigation
            .insert(node.to_string(), navigation);
    }

    pub fn set_underlying(&self, bid: Decimal, offer: Decimal) {
        self.state.lock().underlying = vec![summary("IX.D.SPX", "US 500", Some(bid), Some(offer))];
    }

    pub fn set_quote(&self, epic: &str, bid: Option<Decimal>, offer: Option<Decimal>) {
        self.state
            .lock()
            .quotes
            .insert(epic.to_string(), (bid, offer));
    }

    pub fn set_bid(&self, epic: &str, bid: Decimal) {
        let mut state = self.state.lock();
        let entry = state.quotes.entry(epic.to_string()).or_insert((None, None));
        entry.0 = Some(bid);
    }

    pub fn fail_opens_for(&self, epic: &str) {
        self.state.lock().fail_opens.insert(epic.to_string());
    }

    pub fn clear_open_failures(&self) {
        self.state.lock().fail_opens.clear();
    }

    pub fn reject_opens_for(&self, epic: &str) {
        self.state.lock().reject_opens.insert(epic.to_string());
    }

    pub fn reject_closes(&self, reject: bool) {
        self.state.lock().reject_closes = reject;
    }

    /// Closing any position in `epic` fails at the transport level.
    pub fn fail_closes_for(&self, epic: &str) {
        self.state.lock().fail_closes.insert(epic.to_string());
    }

    pub fn clear_close_failures(&self) {
        self.state.lock().fail_closes.clear();
    }

    /// While hidden, the position list comes back empty as if it lagged.
    pub fn hide_positions(&self, hide: bool) {
        self.state.lock().hide_positions = hide;
    }

    /// Drops a position as if closed elsewhere.
    pub fn remove_position(&self, epic: &str) {
        self.state.lock().positions.retain(|p| p.epic != epic);
    }

    /// Blocks every broker call until [`FakeBroker::release`].
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> Vec<OpenPositionRequest> {
        self.state.lock().opens.clone()
    }

    pub fn closes(&self) -> Vec<ClosePositionRequest> {
        self.state.lock().closes.clone()
    }

    pub fn logouts(&self) -> u32 {
        self.state.lock().logouts
    }

    pub fn open_size(&self, epic: &str) -> Decimal {
        self.state
            .lock()
            .positions
            .iter()
            .filter(|p| p.epic == epic)
            .map(|p| p.size)
            .sum()
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // Closed on release; the error is the wake-up.
            let _ = gate.acquire().await;
        }
    }

    fn next_reference(state: &mut FakeState) -> String {
        state.next_ref += 1;
        format!("REF{}", state.next_ref)
    }
}

#[async_trait]
impl BrokerApi for FakeBroker {
    async fn navigate_markets(&self, node_id: Option<&str>) -> Result<Navigation> {
        self.enter().await;
        let state = self.state.lock();
        Ok(node_id
            .and_then(|id| state.navigation.get(id).cloned())
            .unwrap_or_default())
    }

    async fn search_markets(&self, _term: &str) -> Result<Vec<MarketSummary>> {
        self.enter().await;
        Ok(self.state.lock().underlying.clone())
    }

    async fn open_position(&self, order: &OpenPositionRequest) -> Result<String> {
        self.enter().await;
        let mut state = self.state.lock();
        if state.fail_opens.contains(&order.epic) {
            return Err(IgError::api(400, "error.public-api.failure", "rejected"));
        }
        state.opens.push(order.clone());
        let reference = Self::next_reference(&mut state);

        if state.reject_opens.contains(&order.epic) {
            let confirm = confirmation(&reference, DealStatus::Rejected, None);
            state.confirms.insert(reference.clone(), confirm);
            return Ok(reference);
        }

        let deal_id = format!("DEAL-{reference}");
        let level = state
            .quotes
            .get(&order.epic)
            .and_then(|q| q.1)
            .unwrap_or(order.limit_level / Decimal::TWO);
        let mut confirm = confirmation(&reference, DealStatus::Accepted, Some(&deal_id));
        confirm.size = Some(order.size);
        confirm.level = Some(level);
        confirm.epic = Some(order.epic.clone());
        state.confirms.insert(reference.clone(), confirm);
        state.positions.push(FakePosition {
            deal_id,
            deal_reference: reference.clone(),
            epic: order.epic.clone(),
            size: order.size,
            level,
        });
        Ok(reference)
    }

    async fn close_position(&self, order: &ClosePositionRequest) -> Result<String> {
        self.enter().await;
        let mut state = self.state.lock();
        let failing = state
            .positions
            .iter()
            .any(|p| p.deal_id == order.deal_id && state.fail_closes.contains(&p.epic));
        if failing {
            return Err(IgError::api(500, "error.public-api.failure", "close failed"));
        }
        state.closes.push(order.clone());
        let reference = Self::next_reference(&mut state);

        if state.reject_closes {
            let confirm = confirmation(&reference, DealStatus::Rejected, None);
            state.confirms.insert(reference.clone(), confirm);
            return Ok(reference);
        }

        for position in &mut state.positions {
            if position.deal_id == order.deal_id {
                position.size -= order.size.min(position.size);
            }
        }
        state.positions.retain(|p| p.size > Decimal::ZERO);

        let mut confirm = confirmation(&reference, DealStatus::Accepted, Some(&order.deal_id));
        confirm.size = Some(order.size);
        state.confirms.insert(reference.clone(), confirm);
        Ok(reference)
    }

    async fn confirm_deal(&self, deal_reference: &str) -> Result<DealConfirmation> {
        self.enter().await;
        self.state
            .lock()
            .confirms
            .get(deal_reference)
            .cloned()
            .ok_or_else(|| IgError::api(404, "error.confirms.deal-not-found", deal_reference))
    }

    async fn get_positions(&self) -> Result<Vec<PositionEntry>> {
        self.enter().await;
        let state = self.state.lock();
        if state.hide_positions {
            return Ok(Vec::new());
        }
        Ok(state
            .positions
            .iter()
            .map(|p| {
                let (bid, offer) = state.quotes.get(&p.epic).copied().unwrap_or((None, None));
                PositionEntry {
                    position: OpenPosition {
                        deal_id: p.deal_id.clone(),
                        deal_reference: Some(p.deal_reference.clone()),
                        size: p.size,
                        level: p.level,
                        direction: Direction::Buy,
                        currency: Some("USD".to_string()),
                    },
                    market: summary(&p.epic, &p.epic, bid, offer),
                }
            })
            .collect())
    }

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        self.enter().await;
        Ok(vec![Account {
            account_id: "ACC1".to_string(),
            account_name: "Options".to_string(),
            account_type: Some("SPREADBET".to_string()),
            preferred: true,
            currency: "USD".to_string(),
            balance: Balance {
                balance: dec!(1000),
                deposit: Decimal::ZERO,
                profit_loss: Decimal::ZERO,
                available: dec!(1000),
            },
        }])
    }

    async fn logout(&self) -> Result<()> {
        self.enter().await;
        self.state.lock().logouts += 1;
        Ok(())
    }
}

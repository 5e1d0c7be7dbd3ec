//! Trade lifecycle orchestrator.
//!
//! `tick()` advances the strangle state machine by one step:
//!
//! - **Idle**: once the scheduled event plus the entry offset has passed,
//!   load the chain, price the underlying, select and size both legs, then
//!   submit put and call in that order.
//! - **Dealing**: confirm submitted legs, resubmit rejected ones from the
//!   entry plan, move to Position when both legs are live.
//! - **Position / Won**: refresh legs from the broker's position list and run
//!   the exit rules per leg; return to Idle once everything is flat.
//!
//! A tier-2 hit owes an opposite-leg sale. It is recorded on the cycle before
//! it is sent and retried every tick until the broker accepts it.
//!
//! Won only closes the losing leg. The winner keeps whatever tier 3 left, and
//! its trailing stop keeps watching it until that stop has fired; after that
//! the remainder stays open until it is closed by hand or expires.
//!
//! At most one tick runs at a time. A tick that arrives while another is in
//! flight returns [`TickOutcome::Skipped`] without touching the broker.
//! Status reads never wait on a tick: they see the cycle as of the last
//! completed step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use strangle_core::risk::validate_currency_code;
use strangle_core::{validate_event_time, MarketConfig, RiskParameters, ValidationError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::allocation;
use crate::broker::BrokerApi;
use crate::error::TradingError;
use crate::executor::{self, EntryOutcome};
use crate::market;
use crate::monitor;
use crate::persistence::StatePersistence;
use crate::rules;
use crate::selector;
use crate::status::LifecycleStatus;
use crate::types::{
    Contract, EntryPlan, ExitReason, LegKind, LegSlot, PendingLeg, PendingUnwind, PlannedLeg,
    TradeCycle, TradeState,
};

/// What a call to [`TradeLifecycle::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was in flight; nothing was done.
    Skipped,
    Completed,
    /// The tick hit an error; it was logged and recorded as the last error.
    Failed,
}

/// Clears the in-flight flag when the tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The strangle state machine bound to a broker session.
pub struct TradeLifecycle<B: BrokerApi + ?Sized> {
    broker: Arc<B>,
    market: MarketConfig,
    currency: String,
    params: RwLock<RiskParameters>,
    cycle: Mutex<TradeCycle>,
    /// Copy of `cycle` taken after each step, for readers.
    published: RwLock<TradeCycle>,
    event_time: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    last_tick: RwLock<Option<DateTime<Utc>>>,
    ticking: AtomicBool,
    persistence: Option<StatePersistence>,
}

impl<B: BrokerApi + ?Sized> TradeLifecycle<B> {
    /// Creates an idle lifecycle.
    ///
    /// # Errors
    /// Returns `TradingError::Validation` if the parameters or currency are
    /// out of range.
    pub fn new(
        broker: Arc<B>,
        market: MarketConfig,
        currency: impl Into<String>,
        params: RiskParameters,
    ) -> Result<Self, TradingError> {
        let currency = currency.into();
        validate_currency_code(&currency)?;
        params.validate()?;

        Ok(Self {
            broker,
            market,
            currency,
            params: RwLock::new(params),
            cycle: Mutex::new(TradeCycle::default()),
            published: RwLock::new(TradeCycle::default()),
            event_time: RwLock::new(None),
            last_error: RwLock::new(None),
            last_tick: RwLock::new(None),
            ticking: AtomicBool::new(false),
            persistence: None,
        })
    }

    /// Resumes from, and saves to, `persistence`.
    ///
    /// # Errors
    /// Returns error if the saved cycle cannot be read or violates the
    /// lifecycle invariants.
    pub fn with_persistence(mut self, persistence: StatePersistence) -> Result<Self, TradingError> {
        let cycle = persistence.load()?;
        cycle.check_invariants().map_err(TradingError::Invariant)?;
        if cycle.state != TradeState::Idle {
            info!(state = %cycle.state, "Resuming saved trade cycle");
        }
        *self.published.get_mut() = cycle.clone();
        *self.cycle.get_mut() = cycle;
        self.persistence = Some(persistence);
        Ok(self)
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    // =========================================================================
    // Control Surface
    // =========================================================================

    /// Current risk parameters.
    #[must_use]
    pub fn risk(&self) -> RiskParameters {
        self.params.read().clone()
    }

    /// Applies `update` to a copy of the parameters and installs it only if
    /// the setter and the full validation both pass. Takes effect from the
    /// next tick.
    ///
    /// # Errors
    /// Returns the `ValidationError` from the setter or the cross-field check.
    pub fn update_risk<F>(&self, update: F) -> Result<(), ValidationError>
    where
        F: FnOnce(&mut RiskParameters) -> Result<(), ValidationError>,
    {
        let mut params = self.risk();
        update(&mut params)?;
        params.validate()?;
        *self.params.write() = params;
        info!("Risk parameters updated");
        Ok(())
    }

    #[must_use]
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        *self.event_time.read()
    }

    /// Schedules (or clears) the event the next entry is timed against.
    ///
    /// # Errors
    /// Rejects events in the past or beyond the scheduling horizon.
    pub fn set_event_time(&self, event_time: Option<DateTime<Utc>>) -> Result<(), ValidationError> {
        if let Some(at) = event_time {
            validate_event_time(at, Utc::now())?;
            info!(event_time = %at, "Event scheduled");
        } else {
            info!("Event cleared");
        }
        *self.event_time.write() = event_time;
        Ok(())
    }

    /// Most recent error from a tick or manual operation.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    #[must_use]
    pub fn state(&self) -> TradeState {
        self.published.read().state
    }

    /// Status as of the last completed step; does not wait for a running tick.
    #[must_use]
    pub fn status(&self) -> LifecycleStatus {
        let cycle = self.published.read();
        LifecycleStatus::new(
            &cycle,
            self.event_time(),
            *self.last_tick.read(),
            self.last_error(),
        )
    }

    #[must_use]
    pub fn explain(&self) -> String {
        self.status().explain()
    }

    /// Copy of the persisted aggregate.
    #[must_use]
    pub fn snapshot(&self) -> TradeCycle {
        self.published.read().clone()
    }

    /// Replaces the cycle verbatim, e.g. from an operator-edited dump.
    ///
    /// # Errors
    /// Returns `TradingError::Invariant` if the snapshot is inconsistent.
    pub async fn restore(&self, snapshot: TradeCycle) -> Result<(), TradingError> {
        snapshot.check_invariants().map_err(TradingError::Invariant)?;
        let mut cycle = self.cycle.lock().await;
        warn!(from = %cycle.state, to = %snapshot.state, "Trade cycle restored");
        *cycle = snapshot;
        self.commit(&cycle);
        Ok(())
    }

    /// Forgets both legs and returns to idle. Open positions are left with
    /// the broker.
    pub async fn reset(&self) {
        let mut cycle = self.cycle.lock().await;
        let open = cycle.open_size();
        if open > Decimal::ZERO {
            warn!(state = %cycle.state, open_size = %open, "Reset with open size");
        } else {
            info!(state = %cycle.state, "Reset to idle");
        }
        cycle.reset();
        self.commit(&cycle);
    }

    /// Sells `fraction` of a leg: of its current size when
    /// `relative_to_current`, otherwise of its entry size (capped at what is
    /// still open). Returns the size closed.
    ///
    /// # Errors
    /// Rejects fractions outside (0, 1], legs without a live position and any
    /// failed or rejected exit.
    pub async fn close_leg(
        &self,
        kind: LegKind,
        fraction: Decimal,
        relative_to_current: bool,
    ) -> Result<Decimal, TradingError> {
        if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
            return Err(ValidationError::new(
                "fraction",
                format!("must lie in (0, 1], got {fraction}"),
            )
            .into());
        }

        let mut cycle = self.cycle.lock().await;
        if !matches!(cycle.state, TradeState::Position | TradeState::Won) {
            return Err(TradingError::invariant(format!(
                "no open position to close in {} state",
                cycle.state
            )));
        }
        let leg = cycle
            .leg(kind)
            .confirmed()
            .filter(|leg| leg.is_live())
            .ok_or_else(|| TradingError::invariant(format!("{kind} leg has no live position")))?;

        let base = if relative_to_current {
            leg.size
        } else {
            leg.entry_size
        };
        let size = allocation::sell_size(base, fraction).min(leg.size);
        info!(leg = %kind, fraction = %fraction, size = %size, "Manual close");

        let result = self.sell(&mut cycle, kind, size, ExitReason::Manual).await;
        if let Err(e) = &result {
            self.record_error(e);
        }
        self.finish_if_flat(&mut cycle);
        self.commit(&cycle);
        result
    }

    /// Selects contracts and size with the current parameters without
    /// trading.
    ///
    /// # Errors
    /// Returns error if the chain or underlying cannot be loaded or no
    /// contract qualifies.
    pub async fn preview_entry(&self) -> Result<EntryPlan, TradingError> {
        let params = self.risk();
        self.plan_entry(&params, Utc::now()).await
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Runs one step of the state machine. Never returns an error: failures
    /// are logged, recorded and retried on the next tick.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = TickGuard::acquire(&self.ticking) else {
            debug!("Tick already in flight, skipping");
            return TickOutcome::Skipped;
        };

        let params = self.risk();
        let now = Utc::now();
        let mut cycle = self.cycle.lock().await;
        let before = cycle.state;

        let result = self.advance(&mut cycle, &params, now).await;

        if cycle.state != before {
            info!(from = %before, to = %cycle.state, "Lifecycle state changed");
        }
        *self.last_tick.write() = Some(now);
        self.commit(&cycle);

        match result {
            Ok(()) => TickOutcome::Completed,
            Err(e) => {
                error!(state = %cycle.state, error = %e, "Tick failed");
                self.record_error(&e);
                TickOutcome::Failed
            }
        }
    }

    async fn advance(
        &self,
        cycle: &mut TradeCycle,
        params: &RiskParameters,
        now: DateTime<Utc>,
    ) -> Result<(), TradingError> {
        match cycle.state {
            TradeState::Idle => self.try_enter(cycle, params, now).await,
            TradeState::Dealing => self.confirm_entries(cycle).await,
            TradeState::Position | TradeState::Won => self.manage_exits(cycle, params).await,
        }
    }

    // =========================================================================
    // Entry
    // =========================================================================

    async fn try_enter(
        &self,
        cycle: &mut TradeCycle,
        params: &RiskParameters,
        now: DateTime<Utc>,
    ) -> Result<(), TradingError> {
        let Some(event_time) = self.event_time() else {
            return Ok(());
        };
        let entry_at = event_time + params.entry_offset();
        if now < entry_at {
            debug!(entry_at = %entry_at, "Waiting for entry time");
            return Ok(());
        }

        // Nothing is submitted unless both legs resolve.
        let plan = self.plan_entry(params, now).await?;
        info!(
            underlying = %plan.underlying_price,
            put = %plan.put.contract.instrument_name,
            call = %plan.call.contract.instrument_name,
            size = %plan.size,
            "Entering strangle"
        );

        *self.event_time.write() = None;
        cycle.state = TradeState::Dealing;
        cycle.plan = Some(plan);

        for kind in LegKind::BOTH {
            self.submit_leg(cycle, kind).await?;
        }
        Ok(())
    }

    async fn plan_entry(
        &self,
        params: &RiskParameters,
        now: DateTime<Utc>,
    ) -> Result<EntryPlan, TradingError> {
        let chain = market::fetch_option_chain(
            self.broker.as_ref(),
            &self.market.option_node_id,
            self.market.max_navigation_depth,
            now.date_naive(),
        )
        .await?;
        let price =
            market::fetch_underlying_price(self.broker.as_ref(), &self.market.underlying_search_term)
                .await?;

        let selection = selector::select_entry_contracts(&chain, price, params.delta)?;
        let premium = selection.premium();
        let size = allocation::entry_size(params.budget, premium, params.size_granularity)
            .ok_or_else(|| TradingError::NoQuote(format!("premium {premium}")))?;

        Ok(EntryPlan {
            underlying_price: price,
            size,
            put: planned(selection.put),
            call: planned(selection.call),
            created_at: now,
        })
    }

    async fn submit_leg(&self, cycle: &mut TradeCycle, kind: LegKind) -> Result<(), TradingError> {
        let plan = cycle
            .plan
            .as_ref()
            .ok_or_else(|| TradingError::invariant("dealing without an entry plan"))?;
        let pending = executor::submit_entry(
            self.broker.as_ref(),
            kind,
            plan.leg(kind),
            plan.size,
            &self.currency,
        )
        .await?;
        *cycle.leg_mut(kind) = LegSlot::Submitted(pending);
        Ok(())
    }

    async fn confirm_entries(&self, cycle: &mut TradeCycle) -> Result<(), TradingError> {
        let mut first_error = None;

        for kind in LegKind::BOTH {
            let result = match cycle.leg(kind) {
                LegSlot::Empty => self.submit_leg(cycle, kind).await,
                LegSlot::Submitted(pending) => {
                    let pending = pending.clone();
                    self.confirm_leg(cycle, kind, &pending).await
                }
                LegSlot::Confirmed(_) => Ok(()),
            };
            if let Err(e) = result {
                warn!(leg = %kind, error = %e, "Entry step failed");
                first_error.get_or_insert(e);
            }
        }

        if cycle.both_confirmed_live() {
            cycle.state = TradeState::Position;
            cycle.plan = None;
            info!(size = %cycle.open_size(), "Strangle open");
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn confirm_leg(
        &self,
        cycle: &mut TradeCycle,
        kind: LegKind,
        pending: &PendingLeg,
    ) -> Result<(), TradingError> {
        match executor::confirm_entry(self.broker.as_ref(), kind, pending).await? {
            EntryOutcome::Filled(leg) => {
                *cycle.leg_mut(kind) = LegSlot::Confirmed(*leg);
            }
            EntryOutcome::Rejected(reason) => {
                // Resubmitted from the plan on the next tick.
                *cycle.leg_mut(kind) = LegSlot::Empty;
                *self.last_error.write() = Some(format!("{kind} entry rejected: {reason}"));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Exits
    // =========================================================================

    async fn manage_exits(
        &self,
        cycle: &mut TradeCycle,
        params: &RiskParameters,
    ) -> Result<(), TradingError> {
        let positions = self.broker.get_positions().await?;
        monitor::refresh_legs(cycle, &positions, self.market.missing_position_refreshes);
        if self.finish_if_flat(cycle) {
            return Ok(());
        }

        let mut first_error = None;

        if let Err(e) = self.run_pending_unwind(cycle).await {
            warn!(error = %e, "Opposite unwind failed, retrying next tick");
            first_error.get_or_insert(e);
        }

        if cycle.state == TradeState::Won {
            if let Some(winner) = cycle.won_leg {
                if let Err(e) = self.close_remaining(cycle, winner.opposite()).await {
                    warn!(leg = %winner.opposite(), error = %e, "Opposite close failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        // Sequential: the second leg sees the first leg's unwind.
        for kind in LegKind::BOTH {
            if let Err(e) = self.evaluate_leg(cycle, kind, params).await {
                warn!(leg = %kind, error = %e, "Leg evaluation failed");
                first_error.get_or_insert(e);
            }
        }

        self.finish_if_flat(cycle);
        first_error.map_or(Ok(()), Err)
    }

    async fn evaluate_leg(
        &self,
        cycle: &mut TradeCycle,
        kind: LegKind,
        params: &RiskParameters,
    ) -> Result<(), TradingError> {
        let leg = cycle.leg(kind).confirmed().ok_or_else(|| {
            TradingError::invariant(format!("{kind} leg unconfirmed in {} state", cycle.state))
        })?;
        if !leg.is_live() {
            return Ok(());
        }
        let Some(hit) = rules::evaluate_leg(leg, params)? else {
            return Ok(());
        };

        let size = allocation::sell_size(leg.size, hit.fraction);
        self.sell(cycle, kind, size, hit.reason).await?;

        match hit.reason {
            ExitReason::Tier2 => {
                if let Some(fraction) = params.tier2_unwind_fraction {
                    let opposite = kind.opposite();
                    let open = cycle.leg(opposite).open_size();
                    if open > Decimal::ZERO {
                        cycle.pending_unwind = Some(PendingUnwind {
                            leg: opposite,
                            size: allocation::sell_size(open, fraction),
                        });
                        self.run_pending_unwind(cycle).await?;
                    }
                }
            }
            ExitReason::Tier3 if params.tier3_close_opposite => {
                cycle.state = TradeState::Won;
                cycle.won_leg = Some(kind);
                cycle.pending_unwind = None;
                info!(leg = %kind, "Tier 3 crossed, closing the opposite leg");
                self.close_remaining(cycle, kind.opposite()).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Sends the owed opposite-leg sale. It stays owed until the broker
    /// accepts it or the leg is gone.
    async fn run_pending_unwind(&self, cycle: &mut TradeCycle) -> Result<(), TradingError> {
        let Some(unwind) = cycle.pending_unwind else {
            return Ok(());
        };
        let live = cycle
            .leg(unwind.leg)
            .confirmed()
            .is_some_and(|leg| leg.is_live());
        if !live {
            debug!(leg = %unwind.leg, "Opposite leg already flat, dropping unwind");
            cycle.pending_unwind = None;
            return Ok(());
        }

        self.sell(cycle, unwind.leg, unwind.size, ExitReason::OppositeUnwind)
            .await?;
        cycle.pending_unwind = None;
        Ok(())
    }

    async fn close_remaining(&self, cycle: &mut TradeCycle, kind: LegKind) -> Result<(), TradingError> {
        let Some(leg) = cycle.leg(kind).confirmed().filter(|leg| leg.is_live()) else {
            return Ok(());
        };
        let size = leg.size;
        self.sell(cycle, kind, size, ExitReason::OppositeClose)
            .await
            .map(|_| ())
    }

    /// Closes `size` of a leg and, once the broker accepts, shrinks the local
    /// size and sets the flag belonging to `reason`. A rejected exit changes
    /// nothing, so the rule can fire again.
    async fn sell(
        &self,
        cycle: &mut TradeCycle,
        kind: LegKind,
        size: Decimal,
        reason: ExitReason,
    ) -> Result<Decimal, TradingError> {
        let leg = cycle
            .leg(kind)
            .confirmed()
            .ok_or_else(|| TradingError::invariant(format!("{kind} leg is not confirmed")))?;
        let size = size.min(leg.size);
        if size <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        let closed = executor::execute_exit(self.broker.as_ref(), leg, size, reason).await?;

        let leg = cycle
            .leg_mut(kind)
            .confirmed_mut()
            .ok_or_else(|| TradingError::invariant(format!("{kind} leg is not confirmed")))?;
        leg.size = (leg.size - closed).max(Decimal::ZERO);
        match reason {
            ExitReason::StopLoss
            | ExitReason::TrailingStop
            | ExitReason::OppositeUnwind
            | ExitReason::OppositeClose => leg.stop_part_sold = true,
            ExitReason::Tier2 => leg.tier2_part_sold = true,
            ExitReason::Tier3 => leg.tier3_part_sold = true,
            ExitReason::Manual => {}
        }
        // A stop sale spends the same flag an owed unwind would.
        let stopped = matches!(reason, ExitReason::StopLoss | ExitReason::TrailingStop);
        if stopped && cycle.pending_unwind.is_some_and(|u| u.leg == kind) {
            cycle.pending_unwind = None;
        }
        Ok(closed)
    }

    fn finish_if_flat(&self, cycle: &mut TradeCycle) -> bool {
        let managing = matches!(cycle.state, TradeState::Position | TradeState::Won);
        if managing && cycle.open_size() <= Decimal::ZERO {
            info!(state = %cycle.state, "All legs flat, back to idle");
            cycle.reset();
            return true;
        }
        false
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    fn record_error(&self, error: &TradingError) {
        *self.last_error.write() = Some(error.to_string());
    }

    /// Publishes the cycle to readers and saves it.
    fn commit(&self, cycle: &TradeCycle) {
        self.published.write().clone_from(cycle);
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(e) = persistence.save(cycle) {
            error!(path = %persistence.path().display(), error = %e, "Failed to save trade cycle");
            *self.last_error.write() = Some(e.to_string());
        }
    }
}

fn planned(contract: Contract) -> PlannedLeg {
    PlannedLeg {
        limit_level: allocation::entry_limit(contract.offer.unwrap_or_default()),
        contract,
    }
}

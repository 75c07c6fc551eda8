//! Weekly/monthly put calendar with delta-triggered rolls.
//!
//! Short one weekly put, long one monthly put of the same quantity. Each
//! tick recomputes both deltas, enforces the portfolio max-loss, squares off
//! the day before the hedge expires, rolls the weekly on its own expiry day,
//! and rolls either leg when its delta leaves the configured band.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use algo_options_core::position::{open_pnl, unrealized_pnl};
use algo_options_core::{
    CalendarConfig, Contract, InstrumentMaster, Leg, LegRole, OptionType, RollRule, Side,
};

use crate::engine::{recover_expiries, EngineContext, EntryOutcome, ExitReason, OptionStrategy};
use crate::snapshot::MarketSnapshot;
use crate::store::StateStore;

/// Persisted record of the calendar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarState {
    pub weekly: Option<Leg>,
    pub monthly: Option<Leg>,
    /// Day the weekly leg was last rolled for its own expiry.
    #[serde(default)]
    pub last_rollover_date: Option<chrono::NaiveDate>,
    /// Set while a square-off could not complete; retried every tick.
    #[serde(default)]
    pub exit_pending: Option<ExitReason>,
    #[serde(default)]
    pub last_updated: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Weekly,
    Monthly,
}

impl Slot {
    const fn side(self) -> Side {
        match self {
            Self::Weekly => Side::Sell,
            Self::Monthly => Side::Buy,
        }
    }

    const fn role(self) -> LegRole {
        match self {
            Self::Weekly => LegRole::WeeklyShort,
            Self::Monthly => LegRole::MonthlyHedge,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
        }
    }
}

/// Terminal state of a roll attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollOutcome {
    Rolled,
    NotHeld,
    /// No replacement contract; the old leg is untouched.
    NoReplacement,
    /// Exit order failed; the old leg is untouched and nothing was bought.
    ExitFailed,
    /// Old leg closed but the replacement failed; the slot is empty.
    Naked,
}

pub struct CalendarStrategy {
    name: String,
    config: CalendarConfig,
    option_type: OptionType,
    ctx: EngineContext,
    store: Box<dyn StateStore<CalendarState>>,
    state: CalendarState,
}

impl CalendarStrategy {
    pub fn new(
        name: impl Into<String>,
        config: CalendarConfig,
        ctx: EngineContext,
        store: Box<dyn StateStore<CalendarState>>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            option_type: OptionType::Put,
            ctx,
            store,
            state: CalendarState::default(),
        }
    }

    /// Restores persisted legs. Returns true when a record was found.
    pub fn restore(&mut self) -> bool {
        match self.store.load() {
            Ok(Some(state)) => {
                info!(
                    strategy = %self.name,
                    weekly = ?state.weekly.as_ref().map(|l| l.strike),
                    monthly = ?state.monthly.as_ref().map(|l| l.strike),
                    exit_pending = ?state.exit_pending,
                    "Recovered calendar state"
                );
                self.state = state;
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(strategy = %self.name, error = %e, "Failed to load state, starting flat");
                false
            }
        }
    }

    #[must_use]
    pub const fn state(&self) -> &CalendarState {
        &self.state
    }

    /// Replaces the in-memory state without persisting it.
    pub fn set_state(&mut self, state: CalendarState) {
        self.state = state;
    }

    fn slot(&self, slot: Slot) -> Option<&Leg> {
        match slot {
            Slot::Weekly => self.state.weekly.as_ref(),
            Slot::Monthly => self.state.monthly.as_ref(),
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<Leg> {
        match slot {
            Slot::Weekly => &mut self.state.weekly,
            Slot::Monthly => &mut self.state.monthly,
        }
    }

    fn persist(&mut self, now: NaiveDateTime) {
        self.state.last_updated = Some(now);
        if let Err(e) = self.store.save(&self.state) {
            error!(strategy = %self.name, error = %e, "Failed to persist calendar state");
        }
    }

    fn legs(&self) -> impl Iterator<Item = &Leg> {
        self.state.weekly.iter().chain(self.state.monthly.iter())
    }

    fn select(&self, chain: &[Contract], target: f64, spot: Decimal) -> Option<Contract> {
        self.ctx
            .selector
            .select_by_delta(spot, chain, target, self.option_type)
    }

    pub fn update_deltas(&mut self, snapshot: &MarketSnapshot) {
        let ctx = &self.ctx;
        for leg in self.state.weekly.iter_mut().chain(self.state.monthly.iter_mut()) {
            if !ctx.refresh_delta(leg, snapshot) {
                debug!(instrument = %leg.instrument_id, "No pricing inputs for held leg, delta unchanged");
            }
        }
    }

    /// Sells the weekly, then buys the monthly. A failed monthly squares the
    /// weekly off immediately. Intended to be called only when flat.
    pub async fn enter(&mut self, snapshot: &MarketSnapshot) -> Result<EntryOutcome> {
        info!(strategy = %self.name, spot = %snapshot.spot, "Attempting atomic calendar entry");
        self.state.weekly = None;
        self.state.monthly = None;

        let weekly = self.select(&snapshot.current_weekly, self.config.entry_weekly_delta, snapshot.spot);
        let monthly = self.select(&snapshot.monthly, self.config.entry_monthly_delta, snapshot.spot);
        let (Some(weekly), Some(monthly)) = (weekly, monthly) else {
            warn!(strategy = %self.name, "Could not find suitable strikes for both legs, aborting entry");
            return Ok(EntryOutcome::Skipped);
        };

        let qty = self.config.quantity;
        let Some(short) = self
            .ctx
            .open_leg(&weekly, Side::Sell, qty, LegRole::WeeklyShort, "WEEKLY_ENTRY", snapshot.spot, snapshot.now)
            .await?
        else {
            return Ok(EntryOutcome::FirstLegFailed);
        };
        self.state.weekly = Some(short.clone());
        self.persist(snapshot.now);

        let hedge = self
            .ctx
            .open_leg(&monthly, Side::Buy, qty, LegRole::MonthlyHedge, "MONTHLY_ENTRY", snapshot.spot, snapshot.now)
            .await?;
        if let Some(hedge) = hedge {
            self.state.monthly = Some(hedge);
            self.persist(snapshot.now);
            return Ok(EntryOutcome::Entered);
        }

        error!(strategy = %self.name, "EMERGENCY: monthly buy failed, squaring off weekly to avoid a naked short");
        let closed = self
            .ctx
            .close_leg(&short, &ExitReason::Emergency.tag(), snapshot.ltp(&short.instrument_id), snapshot.now)
            .await?;
        let outcome = if closed.is_some() {
            self.state.weekly = None;
            EntryOutcome::Flattened
        } else {
            error!(strategy = %self.name, "Emergency square-off FAILED, will retry next tick");
            self.state.exit_pending = Some(ExitReason::Emergency);
            EntryOutcome::FlattenFailed
        };
        self.persist(snapshot.now);
        Ok(outcome)
    }

    /// Exit first, then enter. The old leg is kept when the exit fails; the
    /// slot is left empty when the exit fills but the entry does not.
    pub async fn roll_leg(
        &mut self,
        slot: Slot,
        chain: &[Contract],
        target: f64,
        snapshot: &MarketSnapshot,
    ) -> Result<RollOutcome> {
        let Some(old) = self.slot(slot).cloned() else {
            return Ok(RollOutcome::NotHeld);
        };
        let Some(replacement) = self.select(chain, target, snapshot.spot) else {
            warn!(strategy = %self.name, slot = slot.label(), target, "No replacement contract, roll skipped");
            return Ok(RollOutcome::NoReplacement);
        };

        info!(
            strategy = %self.name,
            slot = slot.label(),
            from = %old.strike,
            to = %replacement.strike,
            delta = old.delta,
            target,
            "Rolling leg"
        );

        let exit_tag = format!("{}_EXIT_ADJ", slot.label());
        let closed = self
            .ctx
            .close_leg(&old, &exit_tag, snapshot.ltp(&old.instrument_id), snapshot.now)
            .await?;
        if closed.is_none() {
            error!(strategy = %self.name, slot = slot.label(), "Exit order FAILED, aborting roll");
            return Ok(RollOutcome::ExitFailed);
        }
        *self.slot_mut(slot) = None;
        self.persist(snapshot.now);

        let entry_tag = format!("{}_ROLL_ENTRY", slot.label());
        let opened = self
            .ctx
            .open_leg(&replacement, slot.side(), old.quantity, slot.role(), &entry_tag, snapshot.spot, snapshot.now)
            .await?;
        match opened {
            Some(leg) => {
                *self.slot_mut(slot) = Some(leg);
                self.persist(snapshot.now);
                Ok(RollOutcome::Rolled)
            }
            None => {
                error!(strategy = %self.name, slot = slot.label(), "Roll entry FAILED, position is NAKED/UNHEDGED");
                Ok(RollOutcome::Naked)
            }
        }
    }

    async fn check_rule(
        &mut self,
        slot: Slot,
        rule: RollRule,
        chain: &[Contract],
        snapshot: &MarketSnapshot,
    ) -> Result<Option<RollOutcome>> {
        let Some(delta) = self.slot(slot).map(|l| l.delta) else {
            return Ok(None);
        };
        let target = if delta >= rule.trigger_high {
            warn!(strategy = %self.name, slot = slot.label(), delta, trigger = rule.trigger_high, "Delta above roll trigger");
            rule.target_after_high
        } else if delta <= rule.trigger_low {
            warn!(strategy = %self.name, slot = slot.label(), delta, trigger = rule.trigger_low, "Delta below roll trigger");
            rule.target_after_low
        } else {
            return Ok(None);
        };
        self.roll_leg(slot, chain, target, snapshot).await.map(Some)
    }

    /// Applies the weekly then the monthly roll rule.
    pub async fn check_adjustments(&mut self, snapshot: &MarketSnapshot) -> Result<()> {
        self.check_rule(Slot::Weekly, self.config.weekly_roll, &snapshot.current_weekly, snapshot)
            .await?;
        self.check_rule(Slot::Monthly, self.config.monthly_roll, &snapshot.monthly, snapshot)
            .await?;
        Ok(())
    }

    /// Portfolio max-loss. Returns true when the exit fired.
    ///
    /// Needs both legs and a quote for each; a non-positive limit disables it.
    pub async fn check_risk(&mut self, quotes: &HashMap<String, Decimal>, now: NaiveDateTime) -> Result<bool> {
        if self.config.max_loss <= Decimal::ZERO {
            return Ok(false);
        }
        let (Some(weekly), Some(monthly)) = (&self.state.weekly, &self.state.monthly) else {
            return Ok(false);
        };
        let Some(total) = unrealized_pnl([weekly, monthly], quotes) else {
            debug!(strategy = %self.name, "Missing quote for a held leg, skipping risk check");
            return Ok(false);
        };

        let limit = -self.config.max_loss.abs();
        if total > limit {
            return Ok(false);
        }
        error!(strategy = %self.name, pnl = %total, limit = %limit, "CRITICAL: max loss hit, exiting all positions");
        self.exit_slots(ExitReason::MaxLoss, quotes, now).await?;
        Ok(true)
    }

    /// Rolls the weekly into the next series on its own expiry day, once.
    pub async fn weekly_rollover(&mut self, snapshot: &MarketSnapshot) -> Result<Option<RollOutcome>> {
        let today = snapshot.today();
        let expires_today = self
            .state
            .weekly
            .as_ref()
            .is_some_and(|l| l.expiry.date() == Some(today));
        if !expires_today || self.state.last_rollover_date == Some(today) {
            return Ok(None);
        }

        info!(strategy = %self.name, %today, "Weekly expiry day, rolling short into next series");
        let chain: Vec<Contract> = snapshot
            .current_weekly
            .iter()
            .filter(|c| c.expiry > today)
            .cloned()
            .collect();
        let outcome = self
            .roll_leg(Slot::Weekly, &chain, self.config.weekly_roll.target_after_high, snapshot)
            .await?;
        if matches!(outcome, RollOutcome::Rolled | RollOutcome::Naked) {
            self.state.last_rollover_date = Some(today);
            self.persist(snapshot.now);
        }
        Ok(Some(outcome))
    }

    /// Re-opens whichever leg is missing at its entry delta.
    async fn restore_missing_leg(&mut self, snapshot: &MarketSnapshot) -> Result<()> {
        let (slot, chain, target) = match (&self.state.weekly, &self.state.monthly) {
            (None, Some(_)) => (Slot::Weekly, &snapshot.current_weekly, self.config.entry_weekly_delta),
            (Some(_), None) => (Slot::Monthly, &snapshot.monthly, self.config.entry_monthly_delta),
            _ => return Ok(()),
        };
        warn!(strategy = %self.name, slot = slot.label(), "Position is one-legged, re-opening missing leg");

        let Some(contract) = self.select(chain, target, snapshot.spot) else {
            warn!(strategy = %self.name, slot = slot.label(), "No contract to restore missing leg");
            return Ok(());
        };
        let tag = format!("{}_REENTRY", slot.label());
        let opened = self
            .ctx
            .open_leg(&contract, slot.side(), self.config.quantity, slot.role(), &tag, snapshot.spot, snapshot.now)
            .await?;
        if let Some(leg) = opened {
            *self.slot_mut(slot) = Some(leg);
            self.persist(snapshot.now);
        }
        Ok(())
    }

    async fn exit_slots(
        &mut self,
        reason: ExitReason,
        quotes: &HashMap<String, Decimal>,
        now: NaiveDateTime,
    ) -> Result<bool> {
        info!(strategy = %self.name, %reason, "Initiating total strategy exit");
        let tag = reason.tag();
        let mut realized = Decimal::ZERO;

        for slot in [Slot::Weekly, Slot::Monthly] {
            let Some(leg) = self.slot(slot).cloned() else {
                continue;
            };
            match self
                .ctx
                .close_leg(&leg, &tag, quotes.get(&leg.instrument_id).copied(), now)
                .await?
            {
                Some(pnl) => {
                    realized += pnl;
                    *self.slot_mut(slot) = None;
                    self.persist(now);
                }
                None => error!(strategy = %self.name, slot = slot.label(), "Leg could not be closed, will retry"),
            }
        }

        let flat = self.state.weekly.is_none() && self.state.monthly.is_none();
        self.state.exit_pending = if flat { None } else { Some(reason) };
        self.persist(now);
        info!(strategy = %self.name, %reason, pnl = %realized, flat, "Exit complete");
        Ok(flat)
    }
}

#[async_trait]
impl OptionStrategy for CalendarStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_tick(&mut self, snapshot: &MarketSnapshot) -> Result<()> {
        self.update_deltas(snapshot);

        if let Some(reason) = self.state.exit_pending {
            warn!(strategy = %self.name, %reason, "Retrying pending exit");
            self.exit_slots(reason, &snapshot.quotes, snapshot.now).await?;
            return Ok(());
        }

        if self.check_risk(&snapshot.quotes, snapshot.now).await? {
            return Ok(());
        }

        let flags = snapshot.flags;
        if flags.is_day_before_monthly_expiry && !self.is_flat() {
            warn!(strategy = %self.name, "Day before hedge expiry, squaring off");
            self.exit_slots(ExitReason::PreExpiry, &snapshot.quotes, snapshot.now)
                .await?;
            return Ok(());
        }

        if self.weekly_rollover(snapshot).await? == Some(RollOutcome::Naked) {
            // re-entry waits for the next cycle
            return Ok(());
        }

        match (self.state.weekly.is_some(), self.state.monthly.is_some()) {
            (true, true) if flags.can_adjust => self.check_adjustments(snapshot).await?,
            (true, false) | (false, true) if flags.can_adjust => self.restore_missing_leg(snapshot).await?,
            (false, false) if flags.can_enter_new_cycle && !flags.is_day_before_monthly_expiry => {
                self.enter(snapshot).await?;
            }
            _ => {}
        }

        debug!(
            strategy = %self.name,
            weekly_delta = ?self.state.weekly.as_ref().map(|l| l.delta),
            monthly_delta = ?self.state.monthly.as_ref().map(|l| l.delta),
            "Calendar tick complete"
        );
        Ok(())
    }

    async fn exit_all(
        &mut self,
        reason: ExitReason,
        quotes: &HashMap<String, Decimal>,
        now: NaiveDateTime,
    ) -> Result<bool> {
        self.exit_slots(reason, quotes, now).await
    }

    fn held_instruments(&self) -> Vec<String> {
        self.legs().map(|l| l.instrument_id.clone()).collect()
    }

    fn open_pnl(&self, quotes: &HashMap<String, Decimal>) -> Decimal {
        open_pnl(self.legs(), quotes)
    }

    fn is_flat(&self) -> bool {
        self.state.weekly.is_none() && self.state.monthly.is_none()
    }

    fn recover_metadata(&mut self, master: &dyn InstrumentMaster, now: NaiveDateTime) {
        let legs = self.state.weekly.iter_mut().chain(self.state.monthly.iter_mut());
        if recover_expiries(legs, master) {
            self.persist(now);
        }
    }
}

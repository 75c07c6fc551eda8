//! Weekly put butterfly with a one-shot calendar overlay.
//!
//! Entry buys the upper wing, sells twice the body, buys the lower wing, all
//! on the next-weekly put chain around the strike nearest spot. Once the
//! floating loss crosses the adjustment threshold a near/far put calendar is
//! added on the side spot moved to; from then on the stop-loss applies.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use algo_options_core::config::parse_hhmm;
use algo_options_core::position::{open_pnl, unrealized_pnl};
use algo_options_core::{Contract, InstrumentMaster, IronflyConfig, Leg, LegRole, OptionType, Side};

use crate::engine::{recover_expiries, EngineContext, EntryOutcome, ExitReason, OptionStrategy};
use crate::snapshot::MarketSnapshot;
use crate::store::StateStore;

/// Persisted record of the butterfly and its overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IronflyState {
    pub legs: Vec<Leg>,
    /// The overlay has been added for this structure.
    pub adjusted: bool,
    #[serde(default)]
    pub exit_pending: Option<ExitReason>,
    #[serde(default)]
    pub last_updated: Option<NaiveDateTime>,
}

/// An order the entry sequence intends to place.
#[derive(Debug, Clone)]
pub struct PlannedLeg {
    pub contract: Contract,
    pub side: Side,
    pub quantity: u32,
    pub role: LegRole,
    pub tag: &'static str,
}

pub struct IronflyStrategy {
    name: String,
    config: IronflyConfig,
    entry_time: NaiveTime,
    ctx: EngineContext,
    store: Box<dyn StateStore<IronflyState>>,
    state: IronflyState,
}

impl IronflyStrategy {
    /// # Errors
    ///
    /// Returns an error if the configured entry time is not `HH:MM`.
    pub fn new(
        name: impl Into<String>,
        config: IronflyConfig,
        ctx: EngineContext,
        store: Box<dyn StateStore<IronflyState>>,
    ) -> Result<Self> {
        let entry_time = parse_hhmm(&config.entry_time)?;
        Ok(Self {
            name: name.into(),
            config,
            entry_time,
            ctx,
            store,
            state: IronflyState::default(),
        })
    }

    /// Restores persisted legs. Returns true when a record was found.
    pub fn restore(&mut self) -> bool {
        match self.store.load() {
            Ok(Some(state)) => {
                info!(
                    strategy = %self.name,
                    legs = state.legs.len(),
                    adjusted = state.adjusted,
                    "Recovered iron fly state"
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
    pub const fn state(&self) -> &IronflyState {
        &self.state
    }

    /// Replaces the in-memory state without persisting it.
    pub fn set_state(&mut self, state: IronflyState) {
        self.state = state;
    }

    fn persist(&mut self, now: NaiveDateTime) {
        self.state.last_updated = Some(now);
        if let Err(e) = self.store.save(&self.state) {
            error!(strategy = %self.name, error = %e, "Failed to persist iron fly state");
        }
    }

    fn body(&self) -> Option<&Leg> {
        self.state.legs.iter().find(|l| l.role() == LegRole::FlyBody)
    }

    /// Floating P&L as a percentage of capital. `None` without a full set of quotes.
    #[must_use]
    pub fn pnl_pct(&self, quotes: &HashMap<String, Decimal>) -> Option<Decimal> {
        if self.state.legs.is_empty() || self.config.capital <= Decimal::ZERO {
            return None;
        }
        let pnl = unrealized_pnl(&self.state.legs, quotes)?;
        Some(pnl / self.config.capital * Decimal::ONE_HUNDRED)
    }

    /// Resolves the three fly strikes on `chain`. `None` when any is missing.
    #[must_use]
    pub fn plan_entry(&self, chain: &[Contract], spot: Decimal) -> Option<Vec<PlannedLeg>> {
        let body = chain
            .iter()
            .filter(|c| c.option_type == OptionType::Put)
            .min_by_key(|c| (c.strike - spot).abs())?
            .strike;
        let wing = self.config.wing_width;
        let qty = self.config.quantity;

        let mut plan = Vec::with_capacity(3);
        for (strike, side, quantity, role, tag) in [
            (body + wing, Side::Buy, qty, LegRole::FlyUpper, "FLY_BUY_UPPER"),
            (body, Side::Sell, qty * 2, LegRole::FlyBody, "FLY_SELL_BODY"),
            (body - wing, Side::Buy, qty, LegRole::FlyLower, "FLY_BUY_LOWER"),
        ] {
            let Some(contract) = MarketSnapshot::find_strike(chain, strike, OptionType::Put) else {
                warn!(strategy = %self.name, %strike, %role, "Fly strike not listed, skipping entry");
                return None;
            };
            plan.push(PlannedLeg {
                contract: contract.clone(),
                side,
                quantity,
                role,
                tag,
            });
        }
        Some(plan)
    }

    /// Opens the butterfly leg by leg. Any failure squares off what filled.
    pub async fn enter(&mut self, snapshot: &MarketSnapshot) -> Result<EntryOutcome> {
        let Some(plan) = self.plan_entry(&snapshot.next_weekly, snapshot.spot) else {
            return Ok(EntryOutcome::Skipped);
        };
        info!(strategy = %self.name, spot = %snapshot.spot, body = %plan[1].contract.strike, "Entering iron fly");

        for planned in &plan {
            let opened = self
                .ctx
                .open_leg(
                    &planned.contract,
                    planned.side,
                    planned.quantity,
                    planned.role,
                    planned.tag,
                    snapshot.spot,
                    snapshot.now,
                )
                .await?;
            match opened {
                Some(leg) => {
                    self.state.legs.push(leg);
                    self.persist(snapshot.now);
                }
                None if self.state.legs.is_empty() => return Ok(EntryOutcome::FirstLegFailed),
                None => {
                    error!(strategy = %self.name, role = %planned.role, "EMERGENCY: fly entry broke mid-sequence, flattening");
                    let flat = self
                        .close_all(ExitReason::Emergency, &snapshot.quotes, snapshot.now)
                        .await?;
                    return Ok(if flat {
                        EntryOutcome::Flattened
                    } else {
                        EntryOutcome::FlattenFailed
                    });
                }
            }
        }

        self.state.adjusted = false;
        self.persist(snapshot.now);
        Ok(EntryOutcome::Entered)
    }

    /// Adds the near/far calendar once. Returns true when both legs filled.
    pub async fn add_overlay(&mut self, snapshot: &MarketSnapshot) -> Result<bool> {
        let Some(body) = self.body() else {
            warn!(strategy = %self.name, "No fly body held, cannot place overlay");
            return Ok(false);
        };
        let Some(near_expiry) = body.expiry.date() else {
            warn!(strategy = %self.name, "Fly body expiry unknown, deferring overlay");
            return Ok(false);
        };
        let strike = if snapshot.spot < body.strike {
            body.strike - self.config.overlay_offset
        } else {
            body.strike + self.config.overlay_offset
        };

        let near = snapshot.find_listed(strike, OptionType::Put, near_expiry).cloned();
        let far = MarketSnapshot::find_strike(&snapshot.monthly, strike, OptionType::Put)
            .filter(|c| c.expiry > near_expiry)
            .cloned();
        let (Some(near), Some(far)) = (near, far) else {
            warn!(strategy = %self.name, %strike, "Overlay strikes not listed, skipping adjustment");
            return Ok(false);
        };

        info!(strategy = %self.name, spot = %snapshot.spot, %strike, "Adding calendar overlay");
        let qty = self.config.quantity;
        let Some(near_leg) = self
            .ctx
            .open_leg(&near, Side::Sell, qty, LegRole::OverlayNear, "FLY_ADJ_NEAR", snapshot.spot, snapshot.now)
            .await?
        else {
            return Ok(false);
        };
        self.state.legs.push(near_leg.clone());
        self.persist(snapshot.now);

        let far_leg = self
            .ctx
            .open_leg(&far, Side::Buy, qty, LegRole::OverlayFar, "FLY_ADJ_FAR", snapshot.spot, snapshot.now)
            .await?;
        if let Some(far_leg) = far_leg {
            self.state.legs.push(far_leg);
            self.state.adjusted = true;
            self.persist(snapshot.now);
            return Ok(true);
        }

        error!(strategy = %self.name, "EMERGENCY: overlay far leg failed, squaring off near leg");
        let closed = self
            .ctx
            .close_leg(&near_leg, &ExitReason::Emergency.tag(), snapshot.ltp(&near_leg.instrument_id), snapshot.now)
            .await?;
        if closed.is_some() {
            self.remove_leg(&near_leg);
        } else {
            self.state.exit_pending = Some(ExitReason::Emergency);
        }
        self.persist(snapshot.now);
        Ok(false)
    }

    fn remove_leg(&mut self, leg: &Leg) {
        let found = self
            .state
            .legs
            .iter()
            .position(|l| l.instrument_id == leg.instrument_id && l.role() == leg.role());
        if let Some(i) = found {
            self.state.legs.remove(i);
        }
    }

    async fn close_all(
        &mut self,
        reason: ExitReason,
        quotes: &HashMap<String, Decimal>,
        now: NaiveDateTime,
    ) -> Result<bool> {
        info!(strategy = %self.name, %reason, legs = self.state.legs.len(), "Squaring off iron fly");
        let tag = reason.tag();
        let mut realized = Decimal::ZERO;

        for leg in self.state.legs.clone() {
            let closed = self
                .ctx
                .close_leg(&leg, &tag, quotes.get(&leg.instrument_id).copied(), now)
                .await?;
            if let Some(pnl) = closed {
                realized += pnl;
                self.remove_leg(&leg);
                self.persist(now);
            }
        }

        let flat = self.state.legs.is_empty();
        if flat {
            self.state.adjusted = false;
            self.state.exit_pending = None;
        } else {
            error!(strategy = %self.name, left = self.state.legs.len(), "Some legs could not be closed, will retry");
            self.state.exit_pending = Some(reason);
        }
        self.persist(now);
        info!(strategy = %self.name, %reason, pnl = %realized, flat, "Iron fly exit complete");
        Ok(flat)
    }
}

#[async_trait]
impl OptionStrategy for IronflyStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_tick(&mut self, snapshot: &MarketSnapshot) -> Result<()> {
        let ctx = &self.ctx;
        for leg in &mut self.state.legs {
            ctx.refresh_delta(leg, snapshot);
        }

        if let Some(reason) = self.state.exit_pending {
            warn!(strategy = %self.name, %reason, "Retrying pending exit");
            self.close_all(reason, &snapshot.quotes, snapshot.now).await?;
            return Ok(());
        }

        if self.state.legs.is_empty() {
            if snapshot.flags.can_enter_new_cycle && snapshot.now.time() >= self.entry_time {
                self.enter(snapshot).await?;
            }
            return Ok(());
        }

        let today = snapshot.today();
        if self.state.legs.iter().any(|l| l.expiry.date() == Some(today)) {
            info!(strategy = %self.name, "Expiry day, squaring off");
            self.close_all(ExitReason::ExpiryDay, &snapshot.quotes, snapshot.now).await?;
            return Ok(());
        }

        let Some(pct) = self.pnl_pct(&snapshot.quotes) else {
            debug!(strategy = %self.name, "Missing quote for a held leg, skipping checks");
            return Ok(());
        };

        if pct >= self.config.profit_target_pct {
            info!(strategy = %self.name, pnl_pct = %pct, "Profit target reached");
            self.close_all(ExitReason::ProfitTarget, &snapshot.quotes, snapshot.now).await?;
        } else if self.state.adjusted && pct <= -self.config.stop_loss_pct {
            error!(strategy = %self.name, pnl_pct = %pct, "Stop loss hit on adjusted structure");
            self.close_all(ExitReason::StopLoss, &snapshot.quotes, snapshot.now).await?;
        } else if !self.state.adjusted && pct < -self.config.adjust_threshold_pct && snapshot.flags.can_adjust {
            warn!(strategy = %self.name, pnl_pct = %pct, "Adjustment threshold crossed");
            self.add_overlay(snapshot).await?;
        }
        Ok(())
    }

    async fn exit_all(
        &mut self,
        reason: ExitReason,
        quotes: &HashMap<String, Decimal>,
        now: NaiveDateTime,
    ) -> Result<bool> {
        self.close_all(reason, quotes, now).await
    }

    fn held_instruments(&self) -> Vec<String> {
        self.state.legs.iter().map(|l| l.instrument_id.clone()).collect()
    }

    fn open_pnl(&self, quotes: &HashMap<String, Decimal>) -> Decimal {
        open_pnl(&self.state.legs, quotes)
    }

    fn is_flat(&self) -> bool {
        self.state.legs.is_empty()
    }

    fn recover_metadata(&mut self, master: &dyn InstrumentMaster, now: NaiveDateTime) {
        if recover_expiries(self.state.legs.iter_mut(), master) {
            self.persist(now);
        }
    }
}

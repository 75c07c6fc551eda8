//! Shared order sequencing for the adjustment engines.
//!
//! Every fill goes through [`EngineContext::open_leg`] or
//! [`EngineContext::close_leg`], which journal the trade before the caller
//! touches its slots. Executor errors become failed orders unless they are
//! fatal, in which case they propagate and stop the service.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use algo_options_core::greeks::time_to_expiry;
use algo_options_core::{
    Contract, InstrumentMaster, Leg, LegRole, OptionSelector, OrderExecutor, OrderRequest,
    OrderResponse, Side,
};

use crate::journal::{TradeJournal, TradeRecord};
use crate::snapshot::MarketSnapshot;

pub type SharedJournal = Arc<Mutex<TradeJournal>>;

/// Why a strategy is squaring off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    Manual,
    PreExpiry,
    MaxLoss,
    Emergency,
    StopLoss,
    ProfitTarget,
    ExpiryDay,
}

impl ExitReason {
    /// Journal tag for the closing orders.
    #[must_use]
    pub fn tag(self) -> String {
        match self {
            Self::MaxLoss => "MAX_LOSS_EXIT".to_string(),
            Self::Emergency => "EMERGENCY_EXIT".to_string(),
            other => format!("EXIT_{other}"),
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "MANUAL"),
            Self::PreExpiry => write!(f, "PRE_EXPIRY"),
            Self::MaxLoss => write!(f, "MAX_LOSS"),
            Self::Emergency => write!(f, "EMERGENCY"),
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::ProfitTarget => write!(f, "PROFIT_TARGET"),
            Self::ExpiryDay => write!(f, "EXPIRY_DAY"),
        }
    }
}

/// Terminal state of an entry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Entered,
    /// A required contract did not resolve; no orders were placed.
    Skipped,
    /// The first order failed; nothing is held.
    FirstLegFailed,
    /// A later order failed and every filled leg was squared off.
    Flattened,
    /// A later order failed and squaring off also failed; exit is pending.
    FlattenFailed,
}

/// One adjustment engine driven by the polling service.
#[async_trait]
pub trait OptionStrategy: Send {
    fn name(&self) -> &str;

    async fn on_tick(&mut self, snapshot: &MarketSnapshot) -> Result<()>;

    /// Squares off everything. Returns true when the strategy ends flat.
    async fn exit_all(
        &mut self,
        reason: ExitReason,
        quotes: &HashMap<String, Decimal>,
        now: NaiveDateTime,
    ) -> Result<bool>;

    fn held_instruments(&self) -> Vec<String>;

    fn open_pnl(&self, quotes: &HashMap<String, Decimal>) -> Decimal;

    fn is_flat(&self) -> bool;

    /// Fills in `Pending` expiries from the instrument master.
    fn recover_metadata(&mut self, master: &dyn InstrumentMaster, now: NaiveDateTime);
}

/// Collaborators shared by the engines.
#[derive(Clone)]
pub struct EngineContext {
    pub executor: Arc<dyn OrderExecutor>,
    pub selector: OptionSelector,
    pub journal: SharedJournal,
}

impl EngineContext {
    pub fn new(executor: Arc<dyn OrderExecutor>, selector: OptionSelector, journal: SharedJournal) -> Self {
        Self {
            executor,
            selector,
            journal,
        }
    }

    async fn submit(&self, order: OrderRequest) -> Result<OrderResponse> {
        match self.executor.place(&order).await {
            Ok(resp) => Ok(resp),
            Err(e) if e.is_fatal() => {
                Err(anyhow::Error::new(e)).with_context(|| format!("placing {} {}", order.tag, order.instrument_id))
            }
            Err(e) => Ok(OrderResponse::failed(e.to_string())),
        }
    }

    fn journal(&self, record: &TradeRecord) {
        if let Err(e) = self.journal.lock().record(record) {
            error!(error = %e, tag = %record.tag, instrument = %record.instrument_key, "Failed to write trade log");
        }
    }

    /// Opens a leg on `contract`. `Ok(None)` when the order failed.
    ///
    /// Entry price is the reported fill, falling back to the contract's LTP.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_leg(
        &self,
        contract: &Contract,
        side: Side,
        quantity: u32,
        role: LegRole,
        tag: &str,
        spot: Decimal,
        now: NaiveDateTime,
    ) -> Result<Option<Leg>> {
        let order = OrderRequest::new(&contract.instrument_id, quantity, side, tag)
            .with_expiry(Some(contract.expiry));
        let resp = self.submit(order).await?;
        if !resp.is_success() {
            error!(
                %role,
                %side,
                strike = %contract.strike,
                tag,
                reason = resp.reason(),
                "CRITICAL: entry order FAILED"
            );
            return Ok(None);
        }

        let entry_price = resp.fill_price.unwrap_or(contract.ltp);
        self.journal(&TradeRecord::new(now, &contract.instrument_id, side, quantity, entry_price, tag, None));

        let leg = Leg::open(contract, side, quantity, role, entry_price, spot);
        info!(
            %role,
            %side,
            strike = %leg.strike,
            option_type = %leg.option_type,
            price = %entry_price,
            expiry = %contract.expiry,
            delta = format_args!("{:.2}", leg.delta),
            tag,
            "ENTRY"
        );
        Ok(Some(leg))
    }

    /// Squares off `leg`. Returns the realized P&L, or `Ok(None)` when the order failed.
    ///
    /// Exit price is the reported fill, falling back to `mark`.
    pub async fn close_leg(
        &self,
        leg: &Leg,
        tag: &str,
        mark: Option<Decimal>,
        now: NaiveDateTime,
    ) -> Result<Option<Decimal>> {
        let side = leg.closing_side();
        let order = OrderRequest::new(&leg.instrument_id, leg.quantity, side, tag)
            .with_expiry(leg.expiry.date());
        let resp = self.submit(order).await?;
        if !resp.is_success() {
            error!(
                role = %leg.role(),
                strike = %leg.strike,
                tag,
                reason = resp.reason(),
                "CRITICAL: exit order FAILED"
            );
            return Ok(None);
        }

        let exit_price = match resp.fill_price.or(mark) {
            Some(p) => p,
            None => {
                warn!(instrument = %leg.instrument_id, "No fill price or quote for exit, recording zero");
                Decimal::ZERO
            }
        };
        let pnl = leg.pnl_at(exit_price);
        self.journal(&TradeRecord::new(now, &leg.instrument_id, side, leg.quantity, exit_price, tag, Some(pnl)));

        info!(
            role = %leg.role(),
            strike = %leg.strike,
            entry = %leg.entry_price,
            exit = %exit_price,
            pnl = %pnl,
            tag,
            "EXIT"
        );
        Ok(Some(pnl))
    }

    /// Recomputes a held leg's absolute delta.
    ///
    /// Uses the leg's contract from this tick's chains when present, otherwise
    /// the known expiry and entry IV. Returns false when neither is available.
    pub fn refresh_delta(&self, leg: &mut Leg, snapshot: &MarketSnapshot) -> bool {
        let (tte, iv) = match snapshot.find_contract(&leg.instrument_id) {
            Some(c) => (c.time_to_expiry, c.iv),
            None => match leg.expiry.date() {
                Some(expiry) => (time_to_expiry(snapshot.now, expiry), leg.entry_iv),
                None => return false,
            },
        };
        let delta = self
            .selector
            .abs_delta(leg.option_type, snapshot.spot, leg.strike, tte, iv);
        leg.update_delta(delta);
        true
    }
}

/// Resolves `Pending` expiries in place. Returns true if any leg changed.
pub fn recover_expiries<'a, I>(legs: I, master: &dyn InstrumentMaster) -> bool
where
    I: IntoIterator<Item = &'a mut Leg>,
{
    let mut changed = false;
    for leg in legs {
        if leg.expiry.date().is_some() {
            continue;
        }
        if let Some(instrument) = master.lookup(&leg.instrument_id) {
            info!(instrument = %leg.instrument_id, expiry = %instrument.expiry, "Recovered leg expiry");
            changed |= leg.recover_expiry(instrument.expiry);
        }
    }
    changed
}

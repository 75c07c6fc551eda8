#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use algo_options_core::error::Result as ExecResult;
use algo_options_core::{
    Contract, GreeksProvider, Leg, LegRole, OptionSelector, OptionType, OrderExecutor,
    OrderRequest, OrderResponse, Side,
};
use algo_options_strategy::{EngineContext, MarketSnapshot, SharedJournal, TimingFlags, TradeJournal};

/// Replays queued responses; an empty queue fills at the caller's fallback price.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ExecResult<OrderResponse>>>,
    orders: Mutex<Vec<OrderRequest>>,
}

impl ScriptedExecutor {
    pub fn push(&self, response: ExecResult<OrderResponse>) {
        self.script.lock().push_back(response);
    }

    pub fn fill(&self, price: Decimal) {
        self.push(Ok(OrderResponse::filled(Some(price))));
    }

    pub fn reject(&self, reason: &str) {
        self.push(Ok(OrderResponse::failed(reason)));
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl OrderExecutor for ScriptedExecutor {
    async fn place(&self, order: &OrderRequest) -> ExecResult<OrderResponse> {
        self.orders.lock().push(order.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(OrderResponse::filled(None)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Absolute delta looked up by strike.
pub struct TableGreeks(pub HashMap<i64, f64>);

impl GreeksProvider for TableGreeks {
    fn delta(&self, option_type: OptionType, _: f64, strike: f64, _: f64, _: f64, _: f64) -> f64 {
        #[allow(clippy::cast_possible_truncation)]
        let abs = self.0.get(&(strike as i64)).copied().unwrap_or(0.0);
        match option_type {
            OptionType::Put => -abs,
            OptionType::Call => abs,
        }
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub executor: Arc<ScriptedExecutor>,
    pub journal: SharedJournal,
    pub ctx: EngineContext,
}

impl Harness {
    pub fn new(deltas: &[(i64, f64)]) -> Self {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(ScriptedExecutor::default());
        let journal: SharedJournal = Arc::new(Mutex::new(
            TradeJournal::open(dir.path().join("trade_log.csv")).unwrap(),
        ));
        let selector = OptionSelector::new(Arc::new(TableGreeks(deltas.iter().copied().collect())), 0.07);
        let ctx = EngineContext::new(executor.clone(), selector, journal.clone());
        Self {
            dir,
            executor,
            journal,
            ctx,
        }
    }

    pub fn state_path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(format!("{name}_state.json"))
    }

    pub fn closed_pnl(&self) -> Decimal {
        self.journal.lock().closed_pnl()
    }

    pub fn closing_rows(&self) -> usize {
        self.journal
            .lock()
            .read_all()
            .unwrap()
            .iter()
            .filter(|r| r.pnl.is_some())
            .count()
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(day: NaiveDate, h: u32, min: u32) -> NaiveDateTime {
    day.and_hms_opt(h, min, 0).unwrap()
}

pub const WEEKLY: (i32, u32, u32) = (2026, 1, 13);
pub const NEXT_WEEKLY: (i32, u32, u32) = (2026, 1, 20);
pub const MONTHLY: (i32, u32, u32) = (2026, 2, 24);

pub fn expiry((y, m, d): (i32, u32, u32)) -> NaiveDate {
    date(y, m, d)
}

pub fn key(series: &str, strike: Decimal) -> String {
    format!("NSE_FO|{series}{strike}")
}

pub fn put(series: &str, strike: Decimal, exp: NaiveDate, ltp: Decimal) -> Contract {
    Contract {
        instrument_id: key(series, strike),
        strike,
        option_type: OptionType::Put,
        expiry: exp,
        time_to_expiry: 0.02,
        iv: 0.14,
        ltp,
        calculated_delta: None,
    }
}

pub fn chain(series: &str, exp: NaiveDate, strikes: &[(Decimal, Decimal)]) -> Vec<Contract> {
    strikes
        .iter()
        .map(|(strike, ltp)| put(series, *strike, exp, *ltp))
        .collect()
}

/// A held leg built straight from a contract.
pub fn leg(contract: &Contract, side: Side, qty: u32, role: LegRole, entry: Decimal) -> Leg {
    Leg::open(contract, side, qty, role, entry, dec!(21000))
}

pub fn snapshot(
    now: NaiveDateTime,
    spot: Decimal,
    current_weekly: Vec<Contract>,
    next_weekly: Vec<Contract>,
    monthly: Vec<Contract>,
    flags: TimingFlags,
) -> MarketSnapshot {
    let quotes = current_weekly
        .iter()
        .chain(&next_weekly)
        .chain(&monthly)
        .map(|c| (c.instrument_id.clone(), c.ltp))
        .collect();
    MarketSnapshot {
        spot,
        now,
        current_weekly,
        next_weekly,
        monthly,
        quotes,
        flags,
    }
}

pub fn quote(snapshot: &mut MarketSnapshot, instrument_id: &str, ltp: Decimal) {
    snapshot.quotes.insert(instrument_id.to_string(), ltp);
}

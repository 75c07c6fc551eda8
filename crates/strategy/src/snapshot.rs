//! Per-tick market input to the strategies.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use algo_options_core::{Contract, OptionType};

/// Timing gates computed by the feed for the current tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingFlags {
    pub can_enter_new_cycle: bool,
    pub is_day_before_monthly_expiry: bool,
    /// Today is the monthly expiry.
    pub is_expiry_today: bool,
    /// Adjustment candle boundary reached this tick.
    pub can_adjust: bool,
    /// Today's weekly expiry was skipped when picking chains.
    pub expiry_skipped: bool,
}

#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub spot: Decimal,
    /// Exchange-local wall clock.
    pub now: NaiveDateTime,
    pub current_weekly: Vec<Contract>,
    pub next_weekly: Vec<Contract>,
    pub monthly: Vec<Contract>,
    pub quotes: HashMap<String, Decimal>,
    pub flags: TimingFlags,
}

impl MarketSnapshot {
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }

    #[must_use]
    pub fn ltp(&self, instrument_id: &str) -> Option<Decimal> {
        self.quotes.get(instrument_id).copied()
    }

    /// Finds a held instrument in any chain of this tick.
    #[must_use]
    pub fn find_contract(&self, instrument_id: &str) -> Option<&Contract> {
        self.current_weekly
            .iter()
            .chain(&self.next_weekly)
            .chain(&self.monthly)
            .find(|c| c.instrument_id == instrument_id)
    }

    /// Resolves a strike/expiry pair across every chain of this tick.
    #[must_use]
    pub fn find_listed(&self, strike: Decimal, option_type: OptionType, expiry: NaiveDate) -> Option<&Contract> {
        self.current_weekly
            .iter()
            .chain(&self.next_weekly)
            .chain(&self.monthly)
            .find(|c| c.strike == strike && c.option_type == option_type && c.expiry == expiry)
    }

    /// Resolves a strike in one chain.
    #[must_use]
    pub fn find_strike(chain: &[Contract], strike: Decimal, option_type: OptionType) -> Option<&Contract> {
        chain
            .iter()
            .find(|c| c.strike == strike && c.option_type == option_type)
    }
}

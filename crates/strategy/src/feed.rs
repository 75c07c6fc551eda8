//! Instrument master, option chain assembly and the per-tick market feed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use algo_options_core::greeks::{implied_volatility, time_to_expiry};
use algo_options_core::{
    Contract, Instrument, InstrumentMaster, MarketConfig, OptionType, QuoteBook, QuoteSource,
};

use crate::schedule::{ExpirySchedule, Scheduler};
use crate::snapshot::MarketSnapshot;

/// Upstream cap on instruments per LTP request.
const MAX_KEYS_PER_REQUEST: usize = 500;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawExpiry {
    EpochMillis(i64),
    Date(NaiveDate),
}

#[derive(Debug, Deserialize)]
struct RawInstrument {
    instrument_key: String,
    #[serde(alias = "underlying")]
    underlying_symbol: Option<String>,
    #[serde(alias = "strike")]
    strike_price: Option<Decimal>,
    #[serde(alias = "option_type")]
    instrument_type: Option<String>,
    expiry: Option<RawExpiry>,
    #[serde(default)]
    lot_size: Option<u32>,
}

impl RawInstrument {
    fn into_option(self, offset: FixedOffset) -> Option<Instrument> {
        let option_type = OptionType::from_code(self.instrument_type.as_deref()?)?;
        let expiry = match self.expiry? {
            RawExpiry::Date(d) => d,
            RawExpiry::EpochMillis(ms) => DateTime::<Utc>::from_timestamp_millis(ms)?
                .with_timezone(&offset)
                .date_naive(),
        };
        Some(Instrument {
            instrument_key: self.instrument_key,
            underlying: self.underlying_symbol?,
            strike: self.strike_price?,
            option_type,
            expiry,
            lot_size: self.lot_size.unwrap_or_default(),
        })
    }
}

/// Option instruments loaded from the broker's JSON master file.
#[derive(Debug, Default)]
pub struct InstrumentCatalog {
    by_key: HashMap<String, Instrument>,
}

impl InstrumentCatalog {
    /// Loads the file, keeping only CE/PE rows with a strike and expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON array.
    pub fn load(path: impl AsRef<Path>, utc_offset_minutes: i32) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&raw, utc_offset_minutes)?;
        info!(path = %path.display(), options = catalog.len(), "Loaded instrument master");
        Ok(catalog)
    }

    /// # Errors
    ///
    /// Returns an error if `raw` is not a JSON array of objects.
    pub fn from_json(raw: &str, utc_offset_minutes: i32) -> Result<Self, CatalogError> {
        let offset = exchange_offset(utc_offset_minutes);
        let rows: Vec<RawInstrument> = serde_json::from_str(raw)?;
        Ok(Self::from_instruments(rows.into_iter().filter_map(|r| r.into_option(offset))))
    }

    pub fn from_instruments(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        Self {
            by_key: instruments
                .into_iter()
                .map(|i| (i.instrument_key.clone(), i))
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl InstrumentMaster for InstrumentCatalog {
    fn lookup(&self, instrument_id: &str) -> Option<&Instrument> {
        self.by_key.get(instrument_id)
    }

    fn expiries(&self, underlying: &str) -> Vec<NaiveDate> {
        self.by_key
            .values()
            .filter(|i| i.underlying == underlying)
            .map(|i| i.expiry)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn options(&self, underlying: &str, expiry: NaiveDate, option_type: OptionType) -> Vec<&Instrument> {
        let mut found: Vec<&Instrument> = self
            .by_key
            .values()
            .filter(|i| i.underlying == underlying && i.expiry == expiry && i.option_type == option_type)
            .collect();
        found.sort_by(|a, b| a.strike.cmp(&b.strike));
        found
    }
}

/// Falls back to UTC for an out-of-range offset.
#[must_use]
pub fn exchange_offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| {
        warn!(utc_offset_minutes, "Invalid exchange offset, using UTC");
        Utc.fix()
    })
}

/// Turns quoted instruments into priced contracts.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    strike_step: Decimal,
    strike_window: Decimal,
    risk_free_rate: f64,
}

impl ChainBuilder {
    #[must_use]
    pub fn new(config: &MarketConfig) -> Self {
        Self {
            strike_step: config.strike_step,
            strike_window: config.strike_window,
            risk_free_rate: config.risk_free_rate,
        }
    }

    /// Spot rounded to the nearest listed strike step.
    #[must_use]
    pub fn atm(&self, spot: Decimal) -> Decimal {
        if self.strike_step <= Decimal::ZERO {
            return spot;
        }
        (spot / self.strike_step).round() * self.strike_step
    }

    #[must_use]
    pub fn in_window(&self, strike: Decimal, atm: Decimal) -> bool {
        (strike - atm).abs() <= self.strike_window
    }

    /// Every instrument with a quote becomes a contract; IV is solved from its LTP.
    #[must_use]
    pub fn build(
        &self,
        instruments: &[&Instrument],
        quotes: &HashMap<String, Decimal>,
        spot: Decimal,
        now: NaiveDateTime,
    ) -> Vec<Contract> {
        let spot_f = spot.to_f64().unwrap_or_default();
        instruments
            .iter()
            .filter_map(|inst| {
                let ltp = *quotes.get(&inst.instrument_key)?;
                let tte = time_to_expiry(now, inst.expiry);
                let iv = implied_volatility(
                    ltp.to_f64().unwrap_or_default(),
                    spot_f,
                    inst.strike.to_f64().unwrap_or_default(),
                    tte,
                    self.risk_free_rate,
                    inst.option_type,
                );
                Some(Contract {
                    instrument_id: inst.instrument_key.clone(),
                    strike: inst.strike,
                    option_type: inst.option_type,
                    expiry: inst.expiry,
                    time_to_expiry: tte,
                    iv,
                    ltp,
                    calculated_delta: None,
                })
            })
            .collect()
    }
}

/// Produces one market snapshot per polling tick.
#[async_trait]
pub trait MarketFeed: Send {
    /// `Ok(None)` when the market is not ready yet (e.g. no spot quote).
    ///
    /// `held` instruments are always quoted, even outside the strike window.
    async fn snapshot(&mut self, held: &[String]) -> Result<Option<MarketSnapshot>>;
}

/// Snapshot source backed by the broker's LTP endpoint and the instrument master.
pub struct LiveFeed {
    quotes: Arc<dyn QuoteSource>,
    master: Arc<dyn InstrumentMaster>,
    market: MarketConfig,
    chains: ChainBuilder,
    scheduler: Scheduler,
    offset: FixedOffset,
    book: Option<QuoteBook>,
}

impl LiveFeed {
    pub fn new(
        quotes: Arc<dyn QuoteSource>,
        master: Arc<dyn InstrumentMaster>,
        market: MarketConfig,
        scheduler: Scheduler,
    ) -> Self {
        let offset = exchange_offset(market.utc_offset_minutes);
        Self {
            quotes,
            master,
            chains: ChainBuilder::new(&market),
            market,
            scheduler,
            offset,
            book: None,
        }
    }

    /// Mirrors every fetched quote into `book` (used by the paper executor).
    #[must_use]
    pub fn with_quote_book(mut self, book: QuoteBook) -> Self {
        self.book = Some(book);
        self
    }

    fn exchange_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }

    async fn fetch_quotes(&self, keys: &[String]) -> Result<HashMap<String, Decimal>> {
        let mut quotes = HashMap::with_capacity(keys.len());
        for batch in keys.chunks(MAX_KEYS_PER_REQUEST) {
            quotes.extend(self.quotes.ltp(batch).await?);
        }
        Ok(quotes)
    }

    async fn spot(&self) -> Result<Option<Decimal>> {
        let key = self.market.spot_instrument_key.clone();
        let quotes = self.quotes.ltp(std::slice::from_ref(&key)).await?;
        Ok(quotes.get(&key).copied())
    }

    /// Collects the option keys worth quoting this tick.
    fn series_keys(&self, expiries: &[NaiveDate], atm: Decimal, held: &[String]) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for &expiry in expiries {
            for option_type in [OptionType::Put, OptionType::Call] {
                for inst in self.master.options(&self.market.underlying, expiry, option_type) {
                    if self.chains.in_window(inst.strike, atm) && seen.insert(inst.instrument_key.clone()) {
                        keys.push(inst.instrument_key.clone());
                    }
                }
            }
        }
        for key in held {
            if seen.insert(key.clone()) {
                keys.push(key.clone());
            }
        }
        keys
    }

    fn chain_for(
        &self,
        expiry: Option<NaiveDate>,
        quotes: &HashMap<String, Decimal>,
        spot: Decimal,
        now: NaiveDateTime,
    ) -> Vec<Contract> {
        let Some(expiry) = expiry else {
            return Vec::new();
        };
        let mut instruments = self.master.options(&self.market.underlying, expiry, OptionType::Put);
        instruments.extend(self.master.options(&self.market.underlying, expiry, OptionType::Call));
        self.chains.build(&instruments, quotes, spot, now)
    }
}

#[async_trait]
impl MarketFeed for LiveFeed {
    async fn snapshot(&mut self, held: &[String]) -> Result<Option<MarketSnapshot>> {
        let now = self.exchange_now();
        let Some(spot) = self.spot().await? else {
            info!(key = %self.market.spot_instrument_key, "Waiting for spot quote");
            return Ok(None);
        };

        let expiries = self.master.expiries(&self.market.underlying);
        let schedule = ExpirySchedule::resolve(&expiries, now.date()).ok_or_else(|| {
            anyhow!(
                "fewer than two future expiries listed for {}",
                self.market.underlying
            )
        })?;
        if schedule.expiry_skipped {
            debug!(today = %now.date(), "Today's expiry skipped for chain selection");
        }

        let atm = self.chains.atm(spot);
        let series: Vec<NaiveDate> = [Some(schedule.current_weekly), schedule.next_weekly, schedule.monthly]
            .into_iter()
            .flatten()
            .collect();
        let keys = self.series_keys(&series, atm, held);
        let quotes = self.fetch_quotes(&keys).await?;
        if let Some(book) = &self.book {
            book.replace(&quotes);
        }

        let flags = self.scheduler.flags(now, &schedule, &expiries);
        debug!(
            %spot,
            %atm,
            quoted = quotes.len(),
            requested = keys.len(),
            can_adjust = flags.can_adjust,
            "Built market snapshot"
        );

        Ok(Some(MarketSnapshot {
            spot,
            now,
            current_weekly: self.chain_for(Some(schedule.current_weekly), &quotes, spot, now),
            next_weekly: self.chain_for(schedule.next_weekly, &quotes, spot, now),
            monthly: self.chain_for(schedule.monthly, &quotes, spot, now),
            quotes,
            flags,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MASTER: &str = r#"[
        {"instrument_key":"NSE_FO|1","underlying_symbol":"NIFTY","strike_price":21000.0,
         "instrument_type":"PE","expiry":1768501800000,"lot_size":75},
        {"instrument_key":"NSE_FO|2","underlying_symbol":"NIFTY","strike_price":21050.0,
         "instrument_type":"CE","expiry":"2026-01-27","lot_size":75},
        {"instrument_key":"NSE_FO|3","underlying_symbol":"NIFTY","instrument_type":"FUT",
         "expiry":"2026-01-27","lot_size":75},
        {"instrument_key":"NSE_EQ|X","underlying_symbol":"INFY","instrument_type":"EQ"}
    ]"#;

    #[test]
    fn catalog_keeps_only_options() {
        let catalog = InstrumentCatalog::from_json(MASTER, 330).unwrap();
        assert_eq!(catalog.len(), 2);

        let pe = catalog.lookup("NSE_FO|1").unwrap();
        assert_eq!(pe.option_type, OptionType::Put);
        // 2026-01-15 18:30 UTC is midnight IST on the 16th
        assert_eq!(pe.expiry, NaiveDate::from_ymd_opt(2026, 1, 16).unwrap());
        assert_eq!(pe.strike, dec!(21000));

        let expiries = catalog.expiries("NIFTY");
        assert_eq!(expiries.len(), 2);
        assert!(expiries[0] < expiries[1]);
    }

    #[test]
    fn atm_rounds_to_strike_step() {
        let builder = ChainBuilder::new(&MarketConfig::default());
        assert_eq!(builder.atm(dec!(21024)), dec!(21000));
        assert_eq!(builder.atm(dec!(21026)), dec!(21050));
        assert!(builder.in_window(dec!(21500), dec!(21000)));
        assert!(!builder.in_window(dec!(21550), dec!(21000)));
    }

    #[test]
    fn chain_skips_unquoted_instruments() {
        let catalog = InstrumentCatalog::from_json(MASTER, 330).unwrap();
        let builder = ChainBuilder::new(&MarketConfig::default());
        let instruments: Vec<&Instrument> = ["NSE_FO|1", "NSE_FO|2"]
            .iter()
            .filter_map(|k| catalog.lookup(k))
            .collect();
        let quotes = HashMap::from([("NSE_FO|1".to_string(), dec!(120))]);
        let now = NaiveDate::from_ymd_opt(2026, 1, 8)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();

        let chain = builder.build(&instruments, &quotes, dec!(21000), now);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].ltp, dec!(120));
        assert!(chain[0].iv > 0.0);
        assert!(chain[0].time_to_expiry > 0.0);
    }
}

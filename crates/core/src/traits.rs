use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::events::{OrderRequest, OrderResponse};
use crate::types::{Instrument, OptionType};

/// Places orders. Paper and live implementations are interchangeable.
///
/// Callers treat every call as a distinct action and never retry; transport
/// retries belong to the implementation.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn place(&self, order: &OrderRequest) -> Result<OrderResponse>;
    fn name(&self) -> &str;
}

/// Last traded prices for a batch of instruments.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn ltp(&self, instrument_ids: &[String]) -> Result<HashMap<String, Decimal>>;
}

/// Resolves instrument keys to tradable option metadata.
pub trait InstrumentMaster: Send + Sync {
    fn lookup(&self, instrument_id: &str) -> Option<&Instrument>;

    /// Sorted, de-duplicated expiries for an underlying.
    fn expiries(&self, underlying: &str) -> Vec<NaiveDate>;

    fn options(&self, underlying: &str, expiry: NaiveDate, option_type: OptionType) -> Vec<&Instrument>;
}

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// A market order for one option leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument_id: String,
    pub quantity: u32,
    pub side: Side,
    /// Journal tag, e.g. `WEEKLY_ENTRY` or `EXIT_PRE_EXPIRY`.
    pub tag: String,
    pub expiry: Option<NaiveDate>,
}

impl OrderRequest {
    pub fn new(instrument_id: impl Into<String>, quantity: u32, side: Side, tag: impl Into<String>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            quantity,
            side,
            tag: tag.into(),
            expiry: None,
        }
    }

    #[must_use]
    pub const fn with_expiry(mut self, expiry: Option<NaiveDate>) -> Self {
        self.expiry = expiry;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Success,
    Error,
}

/// What the executor reports back for a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub status: OrderStatus,
    /// Average fill price when the executor knows it.
    pub fill_price: Option<Decimal>,
    pub order_id: Option<String>,
    pub message: Option<String>,
}

impl OrderResponse {
    #[must_use]
    pub const fn filled(fill_price: Option<Decimal>) -> Self {
        Self {
            status: OrderStatus::Success,
            fill_price,
            order_id: None,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::Error,
            fill_price: None,
            order_id: None,
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OrderStatus::Success
    }

    /// Failure reason for logs.
    #[must_use]
    pub fn reason(&self) -> &str {
        self.message.as_deref().unwrap_or("Unknown")
    }
}

//! Paper trading executor.
//!
//! Fills every order at the last traded price in the shared quote book.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use algo_options_core::error::Result;
use algo_options_core::{OrderExecutor, OrderRequest, OrderResponse, QuoteBook};

pub struct PaperExecutor {
    quotes: QuoteBook,
}

impl PaperExecutor {
    #[must_use]
    pub const fn new(quotes: QuoteBook) -> Self {
        Self { quotes }
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    async fn place(&self, order: &OrderRequest) -> Result<OrderResponse> {
        let price = self.quotes.ltp(&order.instrument_id).unwrap_or_else(|| {
            warn!(instrument = %order.instrument_id, "No quote for paper fill, using zero");
            Decimal::ZERO
        });

        info!(
            side = %order.side,
            quantity = order.quantity,
            instrument = %order.instrument_id,
            price = %price,
            expiry = ?order.expiry,
            tag = %order.tag,
            "PAPER fill"
        );

        Ok(OrderResponse::filled(Some(price)))
    }

    fn name(&self) -> &str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algo_options_core::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn fills_at_quote_ltp() {
        let book = QuoteBook::new();
        book.insert("NSE_FO|1", dec!(112.35));
        let exec = PaperExecutor::new(book.clone());

        let resp = exec
            .place(&OrderRequest::new("NSE_FO|1", 75, Side::Sell, "WEEKLY_ENTRY"))
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.fill_price, Some(dec!(112.35)));

        book.insert("NSE_FO|1", dec!(98));
        let resp = exec
            .place(&OrderRequest::new("NSE_FO|1", 75, Side::Buy, "WEEKLY_EXIT_ADJ"))
            .await
            .unwrap();
        assert_eq!(resp.fill_price, Some(dec!(98)));
    }

    #[tokio::test]
    async fn unknown_instrument_fills_at_zero() {
        let exec = PaperExecutor::new(QuoteBook::new());
        let resp = exec
            .place(&OrderRequest::new("missing", 75, Side::Buy, "X"))
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.fill_price, Some(Decimal::ZERO));
    }
}

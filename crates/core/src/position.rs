use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::types::{Leg, Side};

/// Signed P&L of a leg opened on `side` at `entry` and marked (or closed) at `mark`.
///
/// Short legs earn `(entry - mark) * qty`, long legs `(mark - entry) * qty`.
#[must_use]
pub fn leg_pnl(side: Side, entry: Decimal, mark: Decimal, quantity: u32) -> Decimal {
    let qty = Decimal::from(quantity);
    match side {
        Side::Sell => (entry - mark) * qty,
        Side::Buy => (mark - entry) * qty,
    }
}

/// Sums unrealized P&L across legs using the quote map.
///
/// Returns `None` when any leg has no quote, so callers never act on a
/// partially priced book.
#[must_use]
pub fn unrealized_pnl<'a, I>(legs: I, quotes: &HashMap<String, Decimal>) -> Option<Decimal>
where
    I: IntoIterator<Item = &'a Leg>,
{
    legs.into_iter().try_fold(Decimal::ZERO, |acc, leg| {
        quotes
            .get(&leg.instrument_id)
            .map(|ltp| acc + leg.pnl_at(*ltp))
    })
}

/// Like [`unrealized_pnl`] but treats missing quotes as flat.
#[must_use]
pub fn open_pnl<'a, I>(legs: I, quotes: &HashMap<String, Decimal>) -> Decimal
where
    I: IntoIterator<Item = &'a Leg>,
{
    legs.into_iter()
        .filter_map(|leg| quotes.get(&leg.instrument_id).map(|ltp| leg.pnl_at(*ltp)))
        .sum()
}

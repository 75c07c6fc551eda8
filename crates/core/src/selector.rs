//! Strike selection by target delta.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::greeks::{BlackScholes, GreeksProvider};
use crate::types::{Contract, OptionType};

/// Picks the contract whose absolute delta is closest to a target.
#[derive(Clone)]
pub struct OptionSelector {
    greeks: Arc<dyn GreeksProvider>,
    risk_free_rate: f64,
}

impl OptionSelector {
    pub fn new(greeks: Arc<dyn GreeksProvider>, risk_free_rate: f64) -> Self {
        Self {
            greeks,
            risk_free_rate,
        }
    }

    /// Black-Scholes selector at the given rate.
    #[must_use]
    pub fn black_scholes(risk_free_rate: f64) -> Self {
        Self::new(Arc::new(BlackScholes), risk_free_rate)
    }

    #[must_use]
    pub const fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    /// Absolute delta of an option under this selector's model.
    #[must_use]
    pub fn abs_delta(
        &self,
        option_type: OptionType,
        spot: Decimal,
        strike: Decimal,
        time_to_expiry: f64,
        iv: f64,
    ) -> f64 {
        self.greeks
            .delta(
                option_type,
                spot.to_f64().unwrap_or_default(),
                strike.to_f64().unwrap_or_default(),
                time_to_expiry,
                self.risk_free_rate,
                iv,
            )
            .abs()
    }

    /// Returns a copy of the contract whose `|delta|` is nearest `target_abs_delta`.
    ///
    /// Only contracts of `option_type` are considered. The first contract
    /// reaching the minimum distance wins. `None` when nothing qualifies.
    #[must_use]
    pub fn select_by_delta(
        &self,
        spot: Decimal,
        chain: &[Contract],
        target_abs_delta: f64,
        option_type: OptionType,
    ) -> Option<Contract> {
        let mut best: Option<(&Contract, f64)> = None;
        let mut min_diff = f64::INFINITY;

        for contract in chain.iter().filter(|c| c.option_type == option_type) {
            let abs_delta = self.abs_delta(
                option_type,
                spot,
                contract.strike,
                contract.time_to_expiry,
                contract.iv,
            );
            let diff = (abs_delta - target_abs_delta).abs();
            if diff < min_diff {
                min_diff = diff;
                best = Some((contract, abs_delta));
            }
        }

        best.map(|(contract, abs_delta)| {
            debug!(
                strike = %contract.strike,
                delta = abs_delta,
                target = target_abs_delta,
                "Selected contract by delta"
            );
            Contract {
                calculated_delta: Some(abs_delta),
                ..contract.clone()
            }
        })
    }
}

impl std::fmt::Debug for OptionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionSelector")
            .field("risk_free_rate", &self.risk_free_rate)
            .finish_non_exhaustive()
    }
}

//! Black-Scholes delta and implied volatility.

use chrono::{NaiveDate, NaiveDateTime};

use crate::types::OptionType;

/// Floor applied to time to expiry (years) so expiring contracts stay priceable.
pub const MIN_TIME_TO_EXPIRY: f64 = 1e-4;

/// Returned by the IV solver when no meaningful volatility exists.
pub const IV_FLOOR: f64 = 0.001;

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;
const IV_INITIAL_GUESS: f64 = 0.5;
const IV_MAX_ITERATIONS: usize = 100;
const IV_TOLERANCE: f64 = 1e-5;

/// Computes option delta. Puts are negative, calls positive.
pub trait GreeksProvider: Send + Sync {
    fn delta(
        &self,
        option_type: OptionType,
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        rate: f64,
        iv: f64,
    ) -> f64;
}

/// Closed-form Black-Scholes greeks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlackScholes;

impl GreeksProvider for BlackScholes {
    fn delta(
        &self,
        option_type: OptionType,
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        rate: f64,
        iv: f64,
    ) -> f64 {
        let t = time_to_expiry.max(MIN_TIME_TO_EXPIRY);
        let sigma = iv.max(IV_FLOOR);
        let d1 = d1(spot, strike, t, rate, sigma);
        match option_type {
            OptionType::Call => normal_cdf(d1),
            OptionType::Put => normal_cdf(d1) - 1.0,
        }
    }
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
}

fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn d1(spot: f64, strike: f64, t: f64, rate: f64, sigma: f64) -> f64 {
    ((spot / strike).ln() + (rate + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt())
}

/// Black-Scholes premium.
#[must_use]
pub fn bs_price(option_type: OptionType, spot: f64, strike: f64, t: f64, rate: f64, sigma: f64) -> f64 {
    let d1 = d1(spot, strike, t, rate, sigma);
    let d2 = d1 - sigma * t.sqrt();
    let discounted = strike * (-rate * t).exp();
    match option_type {
        OptionType::Call => spot * normal_cdf(d1) - discounted * normal_cdf(d2),
        OptionType::Put => discounted * normal_cdf(-d2) - spot * normal_cdf(-d1),
    }
}

fn vega(spot: f64, strike: f64, t: f64, rate: f64, sigma: f64) -> f64 {
    spot * normal_pdf(d1(spot, strike, t, rate, sigma)) * t.sqrt()
}

/// Solves implied volatility from a traded premium with Newton-Raphson.
///
/// Returns [`IV_FLOOR`] for expired contracts or premiums below intrinsic.
#[must_use]
pub fn implied_volatility(
    price: f64,
    spot: f64,
    strike: f64,
    t: f64,
    rate: f64,
    option_type: OptionType,
) -> f64 {
    if t <= 0.0 {
        return IV_FLOOR;
    }

    let intrinsic = match option_type {
        OptionType::Put => (strike - spot).max(0.0),
        OptionType::Call => (spot - strike).max(0.0),
    };
    if price < intrinsic {
        return IV_FLOOR;
    }

    let mut sigma = IV_INITIAL_GUESS;
    for _ in 0..IV_MAX_ITERATIONS {
        let diff = price - bs_price(option_type, spot, strike, t, rate, sigma);
        if diff.abs() < IV_TOLERANCE {
            return sigma;
        }
        let v = vega(spot, strike, t, rate, sigma);
        if v == 0.0 {
            break;
        }
        sigma += diff / v;
    }

    if sigma.is_finite() && sigma > 0.0 {
        sigma
    } else {
        IV_FLOOR
    }
}

/// Years from `now` until midnight of `expiry`, floored to [`MIN_TIME_TO_EXPIRY`].
#[must_use]
pub fn time_to_expiry(now: NaiveDateTime, expiry: NaiveDate) -> f64 {
    let expiry_start = expiry.and_hms_opt(0, 0, 0).unwrap_or_default();
    #[allow(clippy::cast_precision_loss)]
    let secs = (expiry_start - now).num_seconds() as f64;
    (secs / SECONDS_PER_YEAR).max(MIN_TIME_TO_EXPIRY)
}

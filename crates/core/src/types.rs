//! Contracts, legs and instrument metadata shared by every strategy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::position::leg_pnl;

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Parses exchange instrument type codes (`CE`/`PE`) as well as `c`/`p`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "CE" | "C" | "CALL" => Some(Self::Call),
            "PE" | "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that closes a position opened on `self`.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// One entry of an option chain for the current polling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub instrument_id: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
    /// Annualized time to expiry, floored to `greeks::MIN_TIME_TO_EXPIRY`.
    pub time_to_expiry: f64,
    pub iv: f64,
    pub ltp: Decimal,
    /// Absolute delta filled in by the selector on the returned copy.
    #[serde(default)]
    pub calculated_delta: Option<f64>,
}

/// Expiry metadata of a held leg. Legs restored from older state files start
/// as `Pending` until the instrument master resolves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "date", rename_all = "lowercase")]
pub enum ExpiryInfo {
    #[default]
    Pending,
    Known(NaiveDate),
}

impl ExpiryInfo {
    #[must_use]
    pub const fn date(&self) -> Option<NaiveDate> {
        match self {
            Self::Pending => None,
            Self::Known(d) => Some(*d),
        }
    }
}

/// Role a leg plays inside its strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LegRole {
    WeeklyShort,
    MonthlyHedge,
    FlyUpper,
    FlyBody,
    FlyLower,
    OverlayNear,
    OverlayFar,
}

impl std::fmt::Display for LegRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WeeklyShort => "weekly-short",
            Self::MonthlyHedge => "monthly-hedge",
            Self::FlyUpper => "fly-upper",
            Self::FlyBody => "fly-body",
            Self::FlyLower => "fly-lower",
            Self::OverlayNear => "overlay-near",
            Self::OverlayFar => "overlay-far",
        };
        write!(f, "{s}")
    }
}

/// An open option position.
///
/// Side and role are fixed at creation; only the delta and the lazily
/// recovered expiry change while the leg is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub instrument_id: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    side: Side,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub entry_spot: Decimal,
    pub entry_iv: f64,
    /// Absolute delta, recomputed every cycle.
    pub delta: f64,
    #[serde(default)]
    pub expiry: ExpiryInfo,
    role: LegRole,
    pub opened_at: DateTime<Utc>,
}

impl Leg {
    /// Builds a leg from a filled contract.
    pub fn open(
        contract: &Contract,
        side: Side,
        quantity: u32,
        role: LegRole,
        entry_price: Decimal,
        entry_spot: Decimal,
    ) -> Self {
        Self {
            instrument_id: contract.instrument_id.clone(),
            strike: contract.strike,
            option_type: contract.option_type,
            side,
            quantity,
            entry_price,
            entry_spot,
            entry_iv: contract.iv,
            delta: contract.calculated_delta.unwrap_or_default(),
            expiry: ExpiryInfo::Known(contract.expiry),
            role,
            opened_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub const fn role(&self) -> LegRole {
        self.role
    }

    #[must_use]
    pub const fn is_short(&self) -> bool {
        matches!(self.side, Side::Sell)
    }

    /// Side of the order that squares this leg off.
    #[must_use]
    pub const fn closing_side(&self) -> Side {
        self.side.opposite()
    }

    /// P&L if the leg were closed at `price`.
    #[must_use]
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        leg_pnl(self.side, self.entry_price, price, self.quantity)
    }

    pub fn update_delta(&mut self, delta: f64) {
        self.delta = delta.abs();
    }

    /// Fills in expiry metadata recovered from the instrument master.
    /// Returns true when the leg changed.
    pub fn recover_expiry(&mut self, expiry: NaiveDate) -> bool {
        if self.expiry == ExpiryInfo::Known(expiry) {
            return false;
        }
        self.expiry = ExpiryInfo::Known(expiry);
        true
    }
}

/// Instrument master entry for a tradable option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_key: String,
    pub underlying: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
    pub lot_size: u32,
}

/// Last traded prices keyed by instrument id, shared between the market feed
/// and the paper executor.
#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    inner: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl QuoteBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the book with the latest quotes.
    pub fn replace(&self, quotes: &HashMap<String, Decimal>) {
        let mut guard = self.inner.write();
        guard.clone_from(quotes);
    }

    pub fn insert(&self, instrument_id: impl Into<String>, ltp: Decimal) {
        self.inner.write().insert(instrument_id.into(), ltp);
    }

    #[must_use]
    pub fn ltp(&self, instrument_id: &str) -> Option<Decimal> {
        self.inner.read().get(instrument_id).copied()
    }
}

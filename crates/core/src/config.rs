use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: TradingMode,
    pub active_strategies: Vec<StrategyKind>,
    pub market: MarketConfig,
    pub calendar: CalendarConfig,
    pub ironfly: IronflyConfig,
    pub schedule: ScheduleConfig,
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "CalendarPEWeekly")]
    CalendarPeWeekly,
    #[serde(rename = "WeeklyIronfly")]
    WeeklyIronfly,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CalendarPeWeekly => write!(f, "CalendarPEWeekly"),
            Self::WeeklyIronfly => write!(f, "WeeklyIronfly"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub underlying: String,
    pub spot_instrument_key: String,
    pub risk_free_rate: f64,
    pub lot_size: u32,
    pub strike_step: Decimal,
    /// Strikes fetched either side of ATM, in points.
    pub strike_window: Decimal,
    /// Exchange offset from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

/// Two-sided roll rule for one leg. Deltas are absolute values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollRule {
    pub trigger_high: f64,
    pub trigger_low: f64,
    /// Replacement delta after the high trigger fires.
    pub target_after_high: f64,
    /// Replacement delta after the low trigger fires.
    pub target_after_low: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub entry_weekly_delta: f64,
    pub entry_monthly_delta: f64,
    pub weekly_roll: RollRule,
    pub monthly_roll: RollRule,
    /// Combined loss that forces a full exit. Zero or negative disables it.
    pub max_loss: Decimal,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IronflyConfig {
    pub wing_width: Decimal,
    pub quantity: u32,
    pub capital: Decimal,
    /// Loss (percent of capital) that adds the calendar overlay.
    pub adjust_threshold_pct: Decimal,
    /// Loss (percent of capital) that closes an adjusted structure.
    pub stop_loss_pct: Decimal,
    pub profit_target_pct: Decimal,
    pub overlay_offset: Decimal,
    pub entry_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub poll_interval_secs: u64,
    pub adjustment_candle_minutes: u32,
    /// Live mode only enters on the monthly expiry day.
    pub strict_monthly_expiry_entry: bool,
    pub entry_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub base_url: String,
    /// Environment variable holding the access token.
    pub token_env: String,
    pub min_call_spacing_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_jitter_ms: u64,
    pub request_timeout_secs: u64,
    pub order_product: String,
    pub order_validity: String,
    pub order_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub trade_log: String,
    pub instrument_file: String,
}

impl AppConfig {
    /// Checks cross-field constraints figment cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let lot = self.market.lot_size;
        if lot == 0 {
            bail!("market.lot_size must be positive");
        }
        for (name, qty) in [
            ("calendar.quantity", self.calendar.quantity),
            ("ironfly.quantity", self.ironfly.quantity),
        ] {
            if qty == 0 || qty % lot != 0 {
                bail!("{name} ({qty}) must be a positive multiple of the lot size ({lot})");
            }
        }
        if self.schedule.adjustment_candle_minutes == 0 {
            bail!("schedule.adjustment_candle_minutes must be positive");
        }
        if self.ironfly.capital <= Decimal::ZERO {
            bail!("ironfly.capital must be positive");
        }
        parse_hhmm(&self.schedule.entry_time).context("schedule.entry_time")?;
        parse_hhmm(&self.ironfly.entry_time).context("ironfly.entry_time")?;
        Ok(())
    }
}

/// Parses an `HH:MM` wall-clock time.
///
/// # Errors
///
/// Returns an error if the string is not a valid time.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").with_context(|| format!("invalid HH:MM time '{value}'"))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            active_strategies: vec![StrategyKind::CalendarPeWeekly],
            market: MarketConfig::default(),
            calendar: CalendarConfig::default(),
            ironfly: IronflyConfig::default(),
            schedule: ScheduleConfig::default(),
            broker: BrokerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            underlying: "NIFTY".to_string(),
            spot_instrument_key: "NSE_INDEX|Nifty 50".to_string(),
            risk_free_rate: 0.07,
            lot_size: 75,
            strike_step: Decimal::from(50),
            strike_window: Decimal::from(500),
            utc_offset_minutes: 330,
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            entry_weekly_delta: 0.50,
            entry_monthly_delta: 0.50,
            weekly_roll: RollRule {
                trigger_high: 0.80,
                trigger_low: 0.10,
                target_after_high: 0.50,
                target_after_low: 0.50,
            },
            monthly_roll: RollRule {
                trigger_high: 0.90,
                trigger_low: 0.10,
                target_after_high: 0.50,
                target_after_low: 0.35,
            },
            max_loss: Decimal::from(10_000),
            quantity: 75,
        }
    }
}

impl Default for IronflyConfig {
    fn default() -> Self {
        Self {
            wing_width: Decimal::from(200),
            quantity: 75,
            capital: Decimal::from(200_000),
            adjust_threshold_pct: Decimal::ONE,
            stop_loss_pct: Decimal::TWO,
            profit_target_pct: Decimal::new(15, 1),
            overlay_offset: Decimal::from(100),
            entry_time: "09:30".to_string(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            adjustment_candle_minutes: 5,
            strict_monthly_expiry_entry: true,
            entry_time: "15:15".to_string(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.upstox.com".to_string(),
            token_env: "UPSTOX_ACCESS_TOKEN".to_string(),
            min_call_spacing_ms: 1_000,
            max_retries: 5,
            backoff_base_ms: 5_000,
            max_jitter_ms: 2_000,
            request_timeout_secs: 10,
            order_product: "D".to_string(),
            order_validity: "DAY".to_string(),
            order_tag: "algo".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            trade_log: "trade_log.csv".to_string(),
            instrument_file: "instruments.json".to_string(),
        }
    }
}

//! Expiry calendar and timing gates.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use algo_options_core::config::parse_hhmm;
use algo_options_core::{ScheduleConfig, TradingMode};

use crate::snapshot::TimingFlags;

/// Expiries the chains are built from on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirySchedule {
    pub current_weekly: NaiveDate,
    pub next_weekly: Option<NaiveDate>,
    /// Hedge expiry: last expiry of the month after `current_weekly`.
    pub monthly: Option<NaiveDate>,
    /// Today's expiry was passed over for `current_weekly`.
    pub expiry_skipped: bool,
}

impl ExpirySchedule {
    /// Picks the series from the listed expiries.
    ///
    /// `None` when fewer than two expiries remain from `today` on.
    #[must_use]
    pub fn resolve(expiries: &[NaiveDate], today: NaiveDate) -> Option<Self> {
        let mut future: Vec<NaiveDate> = expiries.iter().copied().filter(|d| *d >= today).collect();
        future.sort_unstable();
        future.dedup();
        if future.len() < 2 {
            return None;
        }

        let expiry_skipped = future[0] == today;
        let series = if expiry_skipped { &future[1..] } else { &future[..] };
        let current_weekly = series[0];

        Some(Self {
            current_weekly,
            next_weekly: series.get(1).copied(),
            monthly: hedge_expiry(series, current_weekly),
            expiry_skipped,
        })
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn last_in_month(expiries: &[NaiveDate], (year, month): (i32, u32)) -> Option<NaiveDate> {
    expiries
        .iter()
        .copied()
        .filter(|d| d.year() == year && d.month() == month)
        .max()
}

/// Last expiry of the month after `anchor`, then the month after that,
/// then the furthest listed expiry.
fn hedge_expiry(expiries: &[NaiveDate], anchor: NaiveDate) -> Option<NaiveDate> {
    let target = next_month(anchor.year(), anchor.month());
    last_in_month(expiries, target)
        .or_else(|| last_in_month(expiries, next_month(target.0, target.1)))
        .or_else(|| expiries.iter().copied().max())
}

/// True when `date` is the last listed expiry of its month.
#[must_use]
pub fn is_monthly_expiry(date: NaiveDate, expiries: &[NaiveDate]) -> bool {
    expiries.contains(&date) && last_in_month(expiries, (date.year(), date.month())) == Some(date)
}

/// Computes the per-tick timing flags.
#[derive(Debug, Clone)]
pub struct Scheduler {
    mode: TradingMode,
    strict_monthly_entry: bool,
    entry_time: NaiveTime,
    candle_minutes: u32,
    last_adjust_minute: Option<NaiveDateTime>,
}

impl Scheduler {
    /// # Errors
    ///
    /// Returns an error if `entry_time` is not `HH:MM`.
    pub fn new(config: &ScheduleConfig, mode: TradingMode) -> anyhow::Result<Self> {
        Ok(Self {
            mode,
            strict_monthly_entry: config.strict_monthly_expiry_entry,
            entry_time: parse_hhmm(&config.entry_time)?,
            candle_minutes: config.adjustment_candle_minutes.max(1),
            last_adjust_minute: None,
        })
    }

    /// Open on candle boundaries, at most once per wall-clock minute.
    pub fn adjustment_window(&mut self, now: NaiveDateTime) -> bool {
        if now.minute() % self.candle_minutes != 0 {
            return false;
        }
        let minute = now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now);
        if self.last_adjust_minute == Some(minute) {
            return false;
        }
        self.last_adjust_minute = Some(minute);
        true
    }

    /// Live strict mode only opens cycles on monthly expiry day after the entry time.
    #[must_use]
    pub fn can_enter_new_cycle(&self, now: NaiveDateTime, is_expiry_today: bool) -> bool {
        match (self.mode, self.strict_monthly_entry) {
            (TradingMode::Live, true) => is_expiry_today && now.time() >= self.entry_time,
            _ => true,
        }
    }

    pub fn flags(&mut self, now: NaiveDateTime, schedule: &ExpirySchedule, expiries: &[NaiveDate]) -> TimingFlags {
        let today = now.date();
        let is_expiry_today = is_monthly_expiry(today, expiries);
        TimingFlags {
            can_enter_new_cycle: self.can_enter_new_cycle(now, is_expiry_today),
            is_day_before_monthly_expiry: schedule.monthly.is_some_and(|m| today.succ_opt() == Some(m)),
            is_expiry_today,
            can_adjust: self.adjustment_window(now),
            expiry_skipped: schedule.expiry_skipped,
        }
    }
}

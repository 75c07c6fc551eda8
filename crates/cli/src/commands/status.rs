//! `status` command: reports persisted legs and the realized P&L without
//! touching the broker.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use tracing::info;

use algo_options_core::{ConfigLoader, Leg, StrategyKind};
use algo_options_strategy::{CalendarState, IronflyState, JsonStateStore, StateStore, TradeJournal};

use super::{state_path, trade_log_path};

/// Arguments for the status command.
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Profile overlay
    #[arg(short, long, env = "ALGO_PROFILE")]
    pub profile: Option<String>,
}

fn report_leg(strategy: StrategyKind, leg: &Leg) {
    info!(
        %strategy,
        role = %leg.role(),
        side = %leg.side(),
        instrument = %leg.instrument_id,
        strike = %leg.strike,
        option_type = %leg.option_type,
        qty = leg.quantity,
        entry = %leg.entry_price,
        delta = format_args!("{:.2}", leg.delta),
        expiry = ?leg.expiry.date(),
        "Open leg"
    );
}

/// # Errors
/// Returns an error if the configuration or a state file cannot be read.
pub fn run_status(args: &StatusArgs) -> Result<()> {
    let config = ConfigLoader::load_from(Path::new(&args.config), args.profile.as_deref())?;

    for &kind in &config.active_strategies {
        let store = JsonStateStore::new(state_path(&config, kind));
        match kind {
            StrategyKind::CalendarPeWeekly => {
                let state: Option<CalendarState> = store.load()?;
                let state = state.unwrap_or_default();
                info!(
                    strategy = %kind,
                    last_rollover = ?state.last_rollover_date,
                    exit_pending = ?state.exit_pending,
                    updated = ?state.last_updated,
                    "Calendar state"
                );
                for leg in state.weekly.iter().chain(state.monthly.iter()) {
                    report_leg(kind, leg);
                }
            }
            StrategyKind::WeeklyIronfly => {
                let state: Option<IronflyState> = store.load()?;
                let state = state.unwrap_or_default();
                info!(
                    strategy = %kind,
                    adjusted = state.adjusted,
                    exit_pending = ?state.exit_pending,
                    updated = ?state.last_updated,
                    "Iron fly state"
                );
                for leg in &state.legs {
                    report_leg(kind, leg);
                }
            }
        }
    }

    let log_path = trade_log_path(&config);
    if log_path.exists() {
        let journal = TradeJournal::open(&log_path)?;
        let trades = journal.read_all()?;
        info!(
            path = %log_path.display(),
            trades = trades.len(),
            closed_pnl = %journal.closed_pnl(),
            "Trade log"
        );
    } else {
        info!(path = %log_path.display(), "No trades recorded yet");
    }
    Ok(())
}

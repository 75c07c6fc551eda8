//! `run` command: wires config, broker, strategies and the polling service.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use parking_lot::Mutex;
use tracing::{info, warn};

use algo_options_core::{
    AppConfig, ConfigLoader, InstrumentMaster, OptionSelector, OrderExecutor, QuoteBook,
    StrategyKind, TradingMode,
};
use algo_options_execution::{PaperExecutor, UpstoxClient};
use algo_options_strategy::{
    CalendarStrategy, EngineContext, InstrumentCatalog, IronflyStrategy, JsonStateStore, LiveFeed,
    OptionStrategy, Scheduler, SharedJournal, TradeJournal, TradingService,
};

use super::{state_path, trade_log_path};

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Profile overlay, loaded from Config.<profile>.toml next to the config file
    #[arg(short, long, env = "ALGO_PROFILE")]
    pub profile: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<String>,
}

/// Runs the controller until Ctrl-C or a fatal broker error.
///
/// # Errors
/// Returns an error if configuration, the instrument master or the trade log
/// cannot be loaded, or when the service stops on a fatal error.
pub async fn run_controller(args: RunArgs) -> Result<()> {
    let config = ConfigLoader::load_from(Path::new(&args.config), args.profile.as_deref())?;
    info!(
        mode = %config.mode,
        strategies = ?config.active_strategies,
        underlying = %config.market.underlying,
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.storage.data_dir)
        .with_context(|| format!("creating data dir {}", config.storage.data_dir))?;

    let master_path = PathBuf::from(&config.storage.data_dir).join(&config.storage.instrument_file);
    let catalog = InstrumentCatalog::load(&master_path, config.market.utc_offset_minutes)
        .with_context(|| format!("loading instrument master {}", master_path.display()))?;
    let master: Arc<dyn InstrumentMaster> = Arc::new(catalog);

    let broker = Arc::new(UpstoxClient::from_env(&config.broker)?);
    let book = QuoteBook::new();
    let executor: Arc<dyn OrderExecutor> = match config.mode {
        TradingMode::Paper => Arc::new(PaperExecutor::new(book.clone())),
        TradingMode::Live => {
            warn!("LIVE mode: orders are sent to the broker");
            broker.clone()
        }
    };
    info!(executor = executor.name(), "Executor ready");

    let journal: SharedJournal = Arc::new(Mutex::new(TradeJournal::open(trade_log_path(&config))?));
    let ctx = EngineContext::new(
        executor,
        OptionSelector::black_scholes(config.market.risk_free_rate),
        journal.clone(),
    );

    let strategies = build_strategies(&config, &ctx)?;
    if strategies.is_empty() {
        bail!("no active strategies configured");
    }

    let scheduler = Scheduler::new(&config.schedule, config.mode)?;
    let feed = LiveFeed::new(broker, master.clone(), config.market.clone(), scheduler).with_quote_book(book);

    TradingService::new(
        feed,
        strategies,
        master,
        journal,
        Duration::from_secs(config.schedule.poll_interval_secs),
    )
    .run()
    .await
}

fn build_strategies(config: &AppConfig, ctx: &EngineContext) -> Result<Vec<Box<dyn OptionStrategy>>> {
    let mut strategies: Vec<Box<dyn OptionStrategy>> = Vec::new();
    for &kind in &config.active_strategies {
        let store = JsonStateStore::new(state_path(config, kind));
        match kind {
            StrategyKind::CalendarPeWeekly => {
                let mut calendar =
                    CalendarStrategy::new(kind.to_string(), config.calendar.clone(), ctx.clone(), Box::new(store));
                calendar.restore();
                strategies.push(Box::new(calendar));
            }
            StrategyKind::WeeklyIronfly => {
                let mut fly =
                    IronflyStrategy::new(kind.to_string(), config.ironfly.clone(), ctx.clone(), Box::new(store))?;
                fly.restore();
                strategies.push(Box::new(fly));
            }
        }
        info!(strategy = %kind, "Strategy loaded");
    }
    Ok(strategies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use algo_options_strategy::StateStore;

    fn context(config: &AppConfig) -> EngineContext {
        let journal = TradeJournal::open(trade_log_path(config)).unwrap();
        EngineContext::new(
            Arc::new(PaperExecutor::new(QuoteBook::new())),
            OptionSelector::black_scholes(config.market.risk_free_rate),
            Arc::new(Mutex::new(journal)),
        )
    }

    fn config_in(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.display().to_string();
        config.active_strategies = vec![StrategyKind::CalendarPeWeekly, StrategyKind::WeeklyIronfly];
        config
    }

    #[test]
    fn builds_every_active_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let strategies = build_strategies(&config, &context(&config)).unwrap();
        let names: Vec<&str> = strategies.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["CalendarPEWeekly", "WeeklyIronfly"]);
        assert!(strategies.iter().all(|s| s.is_flat()));
    }

    #[test]
    fn restores_saved_state_on_build() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.active_strategies = vec![StrategyKind::CalendarPeWeekly];

        let saved = algo_options_strategy::CalendarState {
            last_rollover_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 13),
            ..Default::default()
        };
        JsonStateStore::new(state_path(&config, StrategyKind::CalendarPeWeekly))
            .save(&saved)
            .unwrap();

        let ctx = context(&config);
        let mut calendar = CalendarStrategy::new(
            "CalendarPEWeekly",
            config.calendar.clone(),
            ctx,
            Box::new(JsonStateStore::new(state_path(&config, StrategyKind::CalendarPeWeekly))),
        );
        assert!(calendar.restore());
        assert_eq!(calendar.state().last_rollover_date, saved.last_rollover_date);
    }

    #[test]
    fn bad_ironfly_entry_time_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.ironfly.entry_time = "9h30".into();

        assert!(build_strategies(&config, &context(&config)).is_err());
    }
}

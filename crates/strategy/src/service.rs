//! Polling loop: one snapshot per tick, fanned out to every strategy.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use algo_options_core::error::is_fatal;
use algo_options_core::InstrumentMaster;

use crate::engine::{ExitReason, OptionStrategy, SharedJournal};
use crate::feed::MarketFeed;

/// Realized, floating and combined P&L across strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PnlSummary {
    pub closed: Decimal,
    pub open: Decimal,
    pub total: Decimal,
}

pub struct TradingService<F: MarketFeed> {
    feed: F,
    strategies: Vec<Box<dyn OptionStrategy>>,
    master: Arc<dyn InstrumentMaster>,
    journal: SharedJournal,
    poll_interval: Duration,
    last_quotes: HashMap<String, Decimal>,
    last_tick: Option<NaiveDateTime>,
}

impl<F: MarketFeed> TradingService<F> {
    pub fn new(
        feed: F,
        strategies: Vec<Box<dyn OptionStrategy>>,
        master: Arc<dyn InstrumentMaster>,
        journal: SharedJournal,
        poll_interval: Duration,
    ) -> Self {
        Self {
            feed,
            strategies,
            master,
            journal,
            poll_interval,
            last_quotes: HashMap::new(),
            last_tick: None,
        }
    }

    #[must_use]
    pub fn strategies(&self) -> &[Box<dyn OptionStrategy>] {
        &self.strategies
    }

    /// Exchange-local time of the last completed tick.
    #[must_use]
    pub const fn last_tick(&self) -> Option<NaiveDateTime> {
        self.last_tick
    }

    #[must_use]
    pub fn summary(&self) -> PnlSummary {
        let closed = self.journal.lock().closed_pnl();
        let open: Decimal = self
            .strategies
            .iter()
            .map(|s| s.open_pnl(&self.last_quotes))
            .sum();
        PnlSummary {
            closed,
            open,
            total: closed + open,
        }
    }

    fn log_summary(&self) {
        let summary = self.summary();
        info!(
            closed = %summary.closed,
            open = %summary.open,
            total = %summary.total,
            "P&L summary"
        );
    }

    /// Runs one polling cycle.
    ///
    /// # Errors
    ///
    /// Only fatal errors (e.g. rejected credentials) are returned; anything
    /// else is logged and the next tick retries.
    pub async fn tick(&mut self) -> Result<()> {
        let held: Vec<String> = self
            .strategies
            .iter()
            .flat_map(|s| s.held_instruments())
            .collect();

        let snapshot = match self.feed.snapshot(&held).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(()),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                error!(error = %e, "Failed to build market snapshot");
                return Ok(());
            }
        };

        for strategy in &mut self.strategies {
            strategy.recover_metadata(self.master.as_ref(), snapshot.now);
            if let Err(e) = strategy.on_tick(&snapshot).await {
                if is_fatal(&e) {
                    return Err(e.context(format!("strategy {}", strategy.name())));
                }
                error!(strategy = strategy.name(), error = %e, "Strategy tick failed");
            }
        }

        self.last_quotes = snapshot.quotes;
        self.last_tick = Some(snapshot.now);
        let summary = self.summary();
        debug!(spot = %snapshot.spot, closed = %summary.closed, open = %summary.open, "Tick complete");
        Ok(())
    }

    /// Squares off every strategy at the last known quotes.
    ///
    /// # Errors
    ///
    /// Returns the first fatal executor error.
    pub async fn exit_all(&mut self, reason: ExitReason, now: NaiveDateTime) -> Result<bool> {
        let mut flat = true;
        for strategy in &mut self.strategies {
            if strategy.is_flat() {
                continue;
            }
            flat &= strategy.exit_all(reason, &self.last_quotes, now).await?;
        }
        Ok(flat)
    }

    /// Polls until Ctrl-C or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the loop.
    pub async fn run(self) -> Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Polls until `shutdown` resolves or a fatal error occurs. A shutdown
    /// that fires mid-tick stops the loop once that tick finishes.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the loop.
    pub async fn run_until<S: Future>(mut self, shutdown: S) -> Result<()> {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            strategies = ?self.strategies.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            "Options controller started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Stopping manually, positions stay open");
                    self.log_summary();
                    return Ok(());
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "CRITICAL: fatal error, stopping controller");
                        self.log_summary();
                        return Err(e);
                    }
                }
            }
        }
    }
}

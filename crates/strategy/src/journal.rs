//! Append-only CSV trade log with a running closed P&L.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use algo_options_core::Side;

use crate::store::PersistenceError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One executed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: String,
    pub instrument_key: String,
    pub side: Side,
    pub qty: u32,
    pub price: Decimal,
    pub tag: String,
    /// Realized P&L for closing trades, empty for openings.
    pub pnl: Option<Decimal>,
}

impl TradeRecord {
    pub fn new(
        at: NaiveDateTime,
        instrument_key: impl Into<String>,
        side: Side,
        qty: u32,
        price: Decimal,
        tag: impl Into<String>,
        pnl: Option<Decimal>,
    ) -> Self {
        Self {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            instrument_key: instrument_key.into(),
            side,
            qty,
            price,
            tag: tag.into(),
            pnl,
        }
    }
}

/// Trade log shared by every strategy writing to the same file.
#[derive(Debug)]
pub struct TradeJournal {
    path: PathBuf,
    closed_pnl: Decimal,
}

impl TradeJournal {
    /// Opens (or creates) the log and sums the realized P&L already in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if !path.exists() {
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(["timestamp", "instrument_key", "side", "qty", "price", "tag", "pnl"])?;
            writer.flush()?;
            info!(path = %path.display(), "Created trade log");
        }

        let closed_pnl = Self::sum_closed_pnl(&path)?;
        Ok(Self { path, closed_pnl })
    }

    fn sum_closed_pnl(path: &Path) -> Result<Decimal, PersistenceError> {
        let mut reader = csv::Reader::from_reader(File::open(path)?);
        let mut total = Decimal::ZERO;
        for row in reader.deserialize::<TradeRecord>() {
            match row {
                Ok(record) => total += record.pnl.unwrap_or_default(),
                Err(e) => debug!(error = %e, "Skipping unreadable trade log row"),
            }
        }
        Ok(total)
    }

    /// Appends a trade and accumulates its P&L.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn record(&mut self, trade: &TradeRecord) -> Result<(), PersistenceError> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(trade)?;
        writer.flush()?;

        if let Some(pnl) = trade.pnl {
            self.closed_pnl += pnl;
        }
        Ok(())
    }

    #[must_use]
    pub const fn closed_pnl(&self) -> Decimal {
        self.closed_pnl
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every row.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a row is malformed.
    pub fn read_all(&self) -> Result<Vec<TradeRecord>, PersistenceError> {
        let mut reader = csv::Reader::from_reader(File::open(&self.path)?);
        reader
            .deserialize()
            .map(|row| row.map_err(PersistenceError::from))
            .collect()
    }
}

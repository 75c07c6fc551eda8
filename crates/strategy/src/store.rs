//! Strategy state persistence for surviving restarts.
//!
//! One pretty-printed JSON record per strategy instance. A missing file
//! means "start flat"; a corrupt file is logged and also treated as flat.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from state and journal persistence.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// IO error reading/writing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Serialization sink/source for a strategy's state record.
pub trait StateStore<S>: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    fn save(&self, state: &S) -> Result<(), PersistenceError>;

    /// `Ok(None)` when nothing usable has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error only for IO failures other than a missing file.
    fn load(&self) -> Result<Option<S>, PersistenceError>;
}

#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<S> StateStore<S> for JsonStateStore
where
    S: Serialize + DeserializeOwned,
{
    fn save(&self, state: &S) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        // write-then-rename: the previous file survives a crash mid-write
        let tmp = self.path.with_extension("json.tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(writer, state)?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "Saved strategy state");
        Ok(())
    }

    fn load(&self) -> Result<Option<S>, PersistenceError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No persisted state found, starting flat");
            return Ok(None);
        }

        let reader = BufReader::new(File::open(&self.path)?);
        match serde_json::from_reader(reader) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to parse persisted state, starting flat"
                );
                Ok(None)
            }
        }
    }
}

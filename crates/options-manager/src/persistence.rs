//! Trade cycle persistence for surviving restarts.
//!
//! The `TradeCycle` is written as pretty JSON after every tick and loaded at
//! startup. Writes go to a sibling temp file and are renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.
//!
//! # Example
//!
//! ```ignore
//! use strangle_options_manager::persistence::StatePersistence;
//!
//! let persistence = StatePersistence::new("state/cycle.json".into());
//! let cycle = persistence.load()?;
//! persistence.save(&cycle)?;
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::TradeCycle;

/// Errors from state persistence operations.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// IO error reading/writing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedCycle {
    cycle: TradeCycle,
    saved_at: DateTime<Utc>,
}

/// Handles saving and loading the trade cycle.
#[derive(Debug, Clone)]
pub struct StatePersistence {
    path: PathBuf,
}

impl StatePersistence {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves the cycle to disk, creating parent directories if needed.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn save(&self, cycle: &TradeCycle) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let persisted = PersistedCycle {
            cycle: cycle.clone(),
            saved_at: Utc::now(),
        };

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &persisted)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), state = %cycle.state, "Trade cycle saved");
        Ok(())
    }

    /// Loads the cycle from disk. A missing file yields an idle cycle.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<TradeCycle, PersistenceError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No saved trade cycle, starting idle");
                return Ok(TradeCycle::default());
            }
            Err(e) => return Err(e.into()),
        };

        let persisted: PersistedCycle = serde_json::from_reader(BufReader::new(file))?;
        info!(
            path = %self.path.display(),
            state = %persisted.cycle.state,
            saved_at = %persisted.saved_at,
            "Loaded saved trade cycle"
        );
        Ok(persisted.cycle)
    }

    /// Removes the saved file, if any.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//! Tracker stores - append-only persistence for experiment records
//!
//! Records are never updated after being written, so a store only needs an
//! atomic append and a full read.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::ExperimentRecord;
use crate::search::TrialId;
use crate::{Error, Result};

/// Append-only backing store for the experiment tracker.
///
/// Implementations must be safe for concurrent writers.
pub trait TrackerStore: Send + Sync {
    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` if the store is unreachable or a record
    /// for the same study and trial was already written.
    fn append(&self, record: &ExperimentRecord) -> Result<()>;

    /// Read back every record.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` if the store cannot be read or parsed.
    fn load_all(&self) -> Result<Vec<ExperimentRecord>>;
}

/// JSON-lines file store: one `ExperimentRecord` document per line.
///
/// ## Design
///
/// Each append serializes the record to a single line and writes it with one
/// `write_all` under a mutex, so lines from concurrent trials never
/// interleave. The file is opened per append: a store whose directory
/// disappears surfaces `StorageError` on the next write instead of writing
/// to a dangling handle.
#[derive(Debug)]
pub struct JsonlTrackerStore {
    path: PathBuf,
    written: Mutex<HashSet<(String, TrialId)>>,
}

impl JsonlTrackerStore {
    /// Open (or prepare to create) a store at `path`.
    ///
    /// Existing records are indexed so a resumed process still refuses to
    /// rewrite them.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` if an existing file cannot be parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let written = if path.exists() {
            read_records(&path)?
                .iter()
                .map(|r| (r.study().to_string(), r.trial_id()))
                .collect()
        } else {
            HashSet::new()
        };
        Ok(Self {
            path,
            written: Mutex::new(written),
        })
    }

    /// Location of the JSON-lines file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrackerStore for JsonlTrackerStore {
    fn append(&self, record: &ExperimentRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let key = (record.study().to_string(), record.trial_id());
        let mut written = self
            .written
            .lock()
            .map_err(|_| Error::StorageError("tracker lock poisoned".to_string()))?;
        if written.contains(&key) {
            return Err(Error::StorageError(format!(
                "record for trial {} of study '{}' already written",
                record.trial_id(),
                record.study()
            )));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                Error::StorageError(format!("Failed to open {}: {e}", self.path.display()))
            })?;
        file.write_all(line.as_bytes()).map_err(|e| {
            Error::StorageError(format!("Failed to append to {}: {e}", self.path.display()))
        })?;

        written.insert(key);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<ExperimentRecord>> {
        // Held so a concurrent append never leaves a half-written last line.
        let _written = self
            .written
            .lock()
            .map_err(|_| Error::StorageError("tracker lock poisoned".to_string()))?;
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        read_records(&self.path)
    }
}

fn read_records(path: &Path) -> Result<Vec<ExperimentRecord>> {
    let file = File::open(path)
        .map_err(|e| Error::StorageError(format!("Failed to open {}: {e}", path.display())))?;

    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            Error::StorageError(format!("Failed to read {}: {e}", path.display()))
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            Error::StorageError(format!(
                "Corrupt record at {}:{}: {e}",
                path.display(),
                lineno + 1
            ))
        })?;
        records.push(record);
    }
    Ok(records)
}

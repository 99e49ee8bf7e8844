//! Tabular input and output
//!
//! Keys come from a CSV file where the key sits at a fixed column. Results
//! go to a CSV file with a fixed three-column header; the same file is read
//! back as the next run's cache.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::types::{CacheEntry, Outcome, OutcomeStatus};

/// Header of the results table
pub const OUTPUT_HEADER: [&str; 3] = ["Company Name", "LinkedIn URL", "Status"];

/// Where keys are read from
#[derive(Debug, Clone)]
pub struct KeySource {
    pub path: PathBuf,
    pub key_column: usize,
    pub has_header: bool,
}

impl KeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key_column: 0,
            has_header: false,
        }
    }

    pub fn with_key_column(mut self, column: usize) -> Self {
        self.key_column = column;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    /// Read every key, in file order
    pub fn load_keys(&self) -> EngineResult<Vec<String>> {
        load_keys(&self.path, self.key_column, self.has_header)
    }
}

pub fn load_keys(path: &Path, key_column: usize, has_header: bool) -> EngineResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .from_path(path)
        .map_err(|e| EngineError::csv(path, e))?;

    let mut keys = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| EngineError::csv(path, e))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let key = record.get(key_column).ok_or_else(|| EngineError::MalformedRow {
            path: path.to_path_buf(),
            line,
            reason: format!(
                "expected a key in column {} but row has {} field(s)",
                key_column,
                record.len()
            ),
        })?;

        let key = key.trim();
        if key.is_empty() {
            tracing::warn!(path = %path.display(), line, "Skipping row with empty key");
            continue;
        }
        keys.push(key.to_string());
    }

    Ok(keys)
}

/// Read a results table as `(key, entry, line)` rows in file order
///
/// A missing file yields no rows.
pub fn read_outcome_rows(path: &Path) -> EngineResult<Vec<(String, CacheEntry, u64)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| EngineError::csv(path, e))?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| EngineError::csv(path, e))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        if record.len() != OUTPUT_HEADER.len() {
            return Err(EngineError::MalformedRow {
                path: path.to_path_buf(),
                line,
                reason: format!("expected 3 fields, found {}", record.len()),
            });
        }

        let status: OutcomeStatus =
            record[2]
                .parse()
                .map_err(|reason: String| EngineError::MalformedRow {
                    path: path.to_path_buf(),
                    line,
                    reason,
                })?;

        rows.push((
            record[0].to_string(),
            CacheEntry {
                value: record[1].to_string(),
                status,
            },
            line,
        ));
    }

    Ok(rows)
}

/// Write the header plus one row per outcome, replacing the file
///
/// The table is written to a sibling temp file first and renamed into
/// place, so a failed write leaves the previous file intact. The temp file
/// is removed again if any step fails.
pub fn write_outcomes<'a>(
    path: &Path,
    outcomes: impl IntoIterator<Item = &'a Outcome>,
) -> EngineResult<()> {
    let tmp = temp_path(path);

    let written = write_table(&tmp, outcomes)
        .and_then(|()| fs::rename(&tmp, path).map_err(|e| EngineError::io(path, e)));

    if written.is_err() && tmp.exists() {
        if let Err(e) = fs::remove_file(&tmp) {
            tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove temp file");
        }
    }
    written
}

fn write_table<'a>(
    tmp: &Path,
    outcomes: impl IntoIterator<Item = &'a Outcome>,
) -> EngineResult<()> {
    let mut writer = csv::Writer::from_path(tmp).map_err(|e| EngineError::csv(tmp, e))?;
    writer
        .write_record(OUTPUT_HEADER)
        .map_err(|e| EngineError::csv(tmp, e))?;
    for outcome in outcomes {
        writer
            .write_record([outcome.key(), outcome.value(), outcome.status().label()])
            .map_err(|e| EngineError::csv(tmp, e))?;
    }
    writer.flush().map_err(|e| EngineError::io(tmp, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

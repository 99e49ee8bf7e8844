//! Append-only diagnostic log of erroring resolver attempts
//!
//! One line per failed attempt, `Error fetching <key>: <detail>`. The engine
//! never reads the log back.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};

/// Sink for erroring attempts, shared by every unit of work
pub trait ErrorLog: Send + Sync {
    fn record(&self, key: &str, detail: &str);
}

pub(crate) fn format_line(key: &str, detail: &str) -> String {
    format!("Error fetching {}: {}", key, detail)
}

/// Error log backed by a file opened in append mode
///
/// Each line is flushed before the lock is released, so lines from
/// concurrent tasks never interleave and survive an abrupt exit.
pub struct FileErrorLog {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl FileErrorLog {
    /// Open (creating if needed) without truncating existing lines
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::io(&path, e))?;

        Ok(Self {
            path,
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ErrorLog for FileErrorLog {
    fn record(&self, key: &str, detail: &str) {
        let line = format_line(key, detail);
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Synchronous write under the lock: one short line per failed attempt
        if let Err(e) = writeln!(file, "{}", line).and_then(|()| file.flush()) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to append to error log"
            );
        }
    }
}

/// In-memory error log
#[derive(Debug, Default)]
pub struct MemoryErrorLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Lines recorded for one key
    pub fn lines_for(&self, key: &str) -> Vec<String> {
        let prefix = format!("Error fetching {}: ", key);
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with(&prefix))
            .collect()
    }
}

impl ErrorLog for MemoryErrorLog {
    fn record(&self, key: &str, detail: &str) {
        let line = format_line(key, detail);
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }
}

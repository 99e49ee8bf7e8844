//! Error types for the resolution engine
//!
//! Two tiers: `ResolveError` covers a single failed resolver attempt and is
//! always recovered locally by the retry policy, while `EngineError` covers
//! structural failures (input, cache or output storage) that abort a run.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of one resolver attempt
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode search response: {0}")]
    Decode(String),

    #[error("search service error: {0}")]
    Service(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ResolveError {
    fn from(error: serde_json::Error) -> Self {
        ResolveError::Decode(error.to_string())
    }
}

/// Run-level failure; per-key failures never become one of these
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed row {line} in {}: {reason}", path.display())]
    MalformedRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        EngineError::Csv {
            path: path.into(),
            source,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

//! Outcome, cache entry and result set types

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Value written for keys that did not resolve (both NotFound and Failed)
pub const NOT_FOUND_SENTINEL: &str = "LinkedIn URL not found";

/// Terminal status of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeStatus {
    /// The resolver returned a definitive match
    Success,
    /// The resolver completed cleanly without a match (never retried)
    NotFound,
    /// Every attempt ended in a transient error
    Failed,
}

impl OutcomeStatus {
    /// Label used in the persisted table
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::NotFound => "Not Found",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OutcomeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Success" => Ok(Self::Success),
            "Not Found" | "NotFound" => Ok(Self::NotFound),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Result of one successful resolver attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Canonical profile URL
    Match(String),
    /// The search completed but nothing matched
    NoMatch,
}

/// A persisted `(value, status)` pair for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: String,
    pub status: OutcomeStatus,
}

/// Terminal `(key, value, status)` result for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    key: String,
    value: String,
    status: OutcomeStatus,
}

impl Outcome {
    pub fn success(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: url.into(),
            status: OutcomeStatus::Success,
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: NOT_FOUND_SENTINEL.to_string(),
            status: OutcomeStatus::NotFound,
        }
    }

    pub fn failed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: NOT_FOUND_SENTINEL.to_string(),
            status: OutcomeStatus::Failed,
        }
    }

    /// Copy a cached entry verbatim
    pub fn from_cache(key: impl Into<String>, entry: &CacheEntry) -> Self {
        Self {
            key: key.into(),
            value: entry.value.clone(),
            status: entry.status,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn to_cache_entry(&self) -> CacheEntry {
        CacheEntry {
            value: self.value.clone(),
            status: self.status,
        }
    }
}

/// All outcomes produced by one run, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    outcomes: Vec<Outcome>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            outcomes: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().map(Outcome::key)
    }

    /// Number of outcomes with the given status
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// First outcome for `key`, if any
    pub fn get(&self, key: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }

    pub fn into_outcomes(self) -> Vec<Outcome> {
        self.outcomes
    }
}

impl FromIterator<Outcome> for ResultSet {
    fn from_iter<I: IntoIterator<Item = Outcome>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

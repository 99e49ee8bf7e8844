//! Result cache
//!
//! The previous run's output table doubles as this run's cache. It is read
//! once, in full, before any work is scheduled and written once after all
//! work completes. Nothing touches it in between.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::storage;
use crate::types::{CacheEntry, OutcomeStatus, ResultSet};

/// Which cached statuses count as final on rerun
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Every cached row is final, including Failed
    #[default]
    ReuseAll,
    /// Cached Failed rows are dropped so those keys are attempted again
    RetryFailed,
}

impl CachePolicy {
    fn admits(&self, status: OutcomeStatus) -> bool {
        match self {
            Self::ReuseAll => true,
            Self::RetryFailed => status != OutcomeStatus::Failed,
        }
    }
}

/// Immutable key → entry snapshot taken at run start
///
/// `entries` holds the rows the policy admits as final. `previous` holds
/// every row read from disk, admitted or not, so an interrupted run can
/// write back what it did not get to.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    entries: Arc<HashMap<String, CacheEntry>>,
    previous: Arc<HashMap<String, CacheEntry>>,
}

impl CacheSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.entries.iter()
    }

    /// Every row of the cache file, including ones the policy rejected
    pub fn previous(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.previous.iter()
    }
}

impl FromIterator<(String, CacheEntry)> for CacheSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, CacheEntry)>>(iter: I) -> Self {
        let entries: Arc<HashMap<String, CacheEntry>> = Arc::new(iter.into_iter().collect());
        Self {
            previous: Arc::clone(&entries),
            entries,
        }
    }
}

/// File-backed result cache
#[derive(Debug, Clone)]
pub struct ResultCache {
    path: PathBuf,
    policy: CachePolicy,
}

impl ResultCache {
    pub fn new(path: impl Into<PathBuf>, policy: CachePolicy) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Read the whole cache. A missing file is an empty cache.
    pub fn load(&self) -> EngineResult<CacheSnapshot> {
        let rows = storage::read_outcome_rows(&self.path)?;
        let total_rows = rows.len();

        let mut entries = HashMap::with_capacity(total_rows);
        let mut previous = HashMap::with_capacity(total_rows);
        let mut skipped = 0usize;
        for (key, entry, _line) in rows {
            // Later rows win over earlier ones for the same key
            if self.policy.admits(entry.status) {
                entries.insert(key.clone(), entry.clone());
            } else {
                entries.remove(&key);
                skipped += 1;
            }
            previous.insert(key, entry);
        }

        tracing::debug!(
            path = %self.path.display(),
            rows = total_rows,
            cached = entries.len(),
            skipped,
            policy = ?self.policy,
            "Loaded result cache"
        );

        Ok(CacheSnapshot {
            entries: Arc::new(entries),
            previous: Arc::new(previous),
        })
    }

    /// Overwrite the cache with this run's results
    pub fn save(&self, results: &ResultSet) -> EngineResult<()> {
        storage::write_outcomes(&self.path, results.iter())?;
        tracing::debug!(
            path = %self.path.display(),
            rows = results.len(),
            "Saved result cache"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;

    const TABLE: &str = "Company Name,LinkedIn URL,Status\n\
        Acme,https://www.linkedin.com/company/acme,Success\n\
        Globex,LinkedIn URL not found,Not Found\n\
        Initech,LinkedIn URL not found,Failed\n";

    #[test]
    fn test_missing_file_is_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().join("absent.csv"), CachePolicy::ReuseAll);
        assert!(cache.load().unwrap().is_empty());
    }

    #[test]
    fn test_reuse_all_keeps_failed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, TABLE).unwrap();

        let snapshot = ResultCache::new(&path, CachePolicy::ReuseAll).load().unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot.get("Acme").unwrap().value,
            "https://www.linkedin.com/company/acme"
        );
        assert_eq!(
            snapshot.get("Initech").unwrap().status,
            OutcomeStatus::Failed
        );
    }

    #[test]
    fn test_retry_failed_drops_failed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, TABLE).unwrap();

        let snapshot = ResultCache::new(&path, CachePolicy::RetryFailed)
            .load()
            .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains("Globex"));
        assert!(!snapshot.contains("Initech"));

        let previous: Vec<&str> = snapshot.previous().map(|(k, _)| k.as_str()).collect();
        assert_eq!(previous.len(), 3);
        assert!(previous.contains(&"Initech"));
    }

    #[test]
    fn test_last_row_wins_for_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(
            &path,
            "Company Name,LinkedIn URL,Status\n\
             Acme,LinkedIn URL not found,Failed\n\
             Acme,https://www.linkedin.com/company/acme,Success\n",
        )
        .unwrap();

        let snapshot = ResultCache::new(&path, CachePolicy::ReuseAll).load().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("Acme").unwrap().status, OutcomeStatus::Success);
    }

    #[test]
    fn test_save_overwrites_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, TABLE).unwrap();

        let cache = ResultCache::new(&path, CachePolicy::ReuseAll);
        let results: ResultSet = vec![Outcome::not_found("Umbrella")].into_iter().collect();
        cache.save(&results).unwrap();

        let snapshot = cache.load().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("Umbrella"));
    }
}

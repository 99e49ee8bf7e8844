//! Resolution engine
//!
//! One run: read the cache snapshot, schedule every key, write the result
//! set back over the cache file. The cache file is read once before any
//! work starts and written once after all work ends.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheSnapshot, ResultCache};
use crate::config::{EngineConfig, SchedulingMode};
use crate::error::EngineResult;
use crate::error_log::ErrorLog;
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::resolver::Resolver;
use crate::retry::RetryPolicy;
use crate::scheduler::{ScheduleOutput, Scheduler, DEFAULT_CONCURRENCY};
use crate::types::{Outcome, OutcomeStatus, ResultSet};

/// Summary of one completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total_keys: usize,
    pub cache_hits: usize,
    pub resolved: usize,
    pub success_count: usize,
    pub not_found_count: usize,
    pub failed_count: usize,
    /// Rows written to the output table
    pub rows_written: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub output_path: PathBuf,
}

pub struct ResolutionEngine {
    resolver: Arc<dyn Resolver>,
    cache: ResultCache,
    error_log: Arc<dyn ErrorLog>,
    concurrency: usize,
    mode: SchedulingMode,
    retry: RetryPolicy,
    progress: Option<Arc<dyn ProgressReporter>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ResolutionEngine {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        cache: ResultCache,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        Self {
            resolver,
            cache,
            error_log,
            concurrency: DEFAULT_CONCURRENCY,
            mode: SchedulingMode::default(),
            retry: RetryPolicy::default(),
            progress: None,
            shutdown: None,
        }
    }

    /// Engine wired from a validated configuration
    pub fn from_config(
        config: &EngineConfig,
        resolver: Arc<dyn Resolver>,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        Self::new(
            resolver,
            ResultCache::new(&config.output_path, config.cache_policy),
            error_log,
        )
        .with_concurrency(config.concurrency)
        .with_mode(config.scheduling)
        .with_retry(config.retry_policy())
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_mode(mut self, mode: SchedulingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Use a custom progress reporter instead of the default tracker
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Resolve every key and persist the results
    ///
    /// Per-key failures end up as `Failed` rows; only cache or output
    /// storage problems return an error.
    pub async fn run(&self, keys: Vec<String>) -> EngineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("resolution_run", %run_id);
        self.run_inner(run_id, keys).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, keys: Vec<String>) -> EngineResult<RunReport> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let total_keys = keys.len();

        tracing::info!(
            keys = total_keys,
            concurrency = self.concurrency,
            mode = ?self.mode,
            output = %self.cache.path().display(),
            "Starting resolution run"
        );

        let snapshot = self.cache.load()?;
        tracing::info!(cached = snapshot.len(), "Cache snapshot loaded");

        let progress = self
            .progress
            .clone()
            .unwrap_or_else(|| Arc::new(ProgressTracker::new(total_keys)));

        let mut scheduler = Scheduler::new(self.concurrency, self.error_log.clone())
            .with_mode(self.mode)
            .with_retry(self.retry)
            .with_progress(progress);
        if let Some(shutdown) = &self.shutdown {
            scheduler = scheduler.with_shutdown(shutdown.clone());
        }

        let output = scheduler.run(keys, &snapshot, self.resolver.clone()).await;
        let to_save = rows_to_persist(&output, &snapshot);
        self.cache.save(&to_save)?;

        let results = &output.results;
        let report = RunReport {
            run_id,
            started_at,
            total_keys,
            cache_hits: output.cache_hits,
            resolved: output.resolved(),
            success_count: results.count(OutcomeStatus::Success),
            not_found_count: results.count(OutcomeStatus::NotFound),
            failed_count: results.count(OutcomeStatus::Failed),
            rows_written: to_save.len(),
            cancelled: output.cancelled,
            duration_ms: timer.elapsed().as_millis() as u64,
            output_path: self.cache.path().to_path_buf(),
        };

        if report.cancelled {
            tracing::warn!(
                unfinished = output.unfinished.len(),
                rows = report.rows_written,
                "Run cancelled; saved completed results alongside the previous cache"
            );
        }
        tracing::info!(
            success = report.success_count,
            not_found = report.not_found_count,
            failed = report.failed_count,
            cache_hits = report.cache_hits,
            duration_ms = report.duration_ms,
            "Resolution run finished"
        );

        Ok(report)
    }
}

/// The result set, plus every prior cache row it does not cover when cancelled
fn rows_to_persist(output: &ScheduleOutput, snapshot: &CacheSnapshot) -> ResultSet {
    if !output.cancelled {
        return output.results.clone();
    }

    let covered: HashSet<&str> = output.results.keys().collect();
    let mut carried: Vec<Outcome> = snapshot
        .previous()
        .filter(|(key, _)| !covered.contains(key.as_str()))
        .map(|(key, entry)| Outcome::from_cache(key.as_str(), entry))
        .collect();
    carried.sort_by(|a, b| a.key().cmp(b.key()));

    output.results.iter().cloned().chain(carried).collect()
}

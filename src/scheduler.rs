//! Concurrency scheduler
//!
//! Fans the key list out over at most `W` concurrent units of work and fans
//! the outcomes back into one `ResultSet`. Two disciplines are available:
//!
//! - `Pool`: `W` long-lived workers pull from one shared queue and push
//!   outcomes down a channel to a single collector. A slow key only holds
//!   its own worker.
//! - `Batched`: keys are taken `W` at a time and every group is joined in
//!   full before the next one starts.
//!
//! Either way, no more than `W` resolver calls are ever in flight.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};

use crate::cache::CacheSnapshot;
use crate::config::SchedulingMode;
use crate::error_log::ErrorLog;
use crate::progress::ProgressReporter;
use crate::resolver::Resolver;
use crate::retry::RetryPolicy;
use crate::types::{Outcome, ResultSet};

pub const DEFAULT_CONCURRENCY: usize = 10;

/// Everything one run of the scheduler produced
#[derive(Debug, Clone, Default)]
pub struct ScheduleOutput {
    pub results: ResultSet,
    /// Outcomes copied from the cache snapshot
    pub cache_hits: usize,
    /// Keys that never produced an outcome because the run was cancelled
    pub unfinished: Vec<String>,
    pub cancelled: bool,
}

impl ScheduleOutput {
    /// Outcomes that went through the resolver
    pub fn resolved(&self) -> usize {
        self.results.len() - self.cache_hits
    }
}

pub struct Scheduler {
    concurrency: usize,
    mode: SchedulingMode,
    retry: RetryPolicy,
    error_log: Arc<dyn ErrorLog>,
    progress: Option<Arc<dyn ProgressReporter>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Scheduler {
    pub fn new(concurrency: usize, error_log: Arc<dyn ErrorLog>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            mode: SchedulingMode::default(),
            retry: RetryPolicy::default(),
            error_log,
            progress: None,
            shutdown: None,
        }
    }

    pub fn with_mode(mut self, mode: SchedulingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stop taking new keys once the receiver reads `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// Produce one outcome per key
    ///
    /// Cached keys are copied from `cache` without touching the resolver.
    /// Duplicate keys are processed independently.
    pub async fn run(
        &self,
        keys: Vec<String>,
        cache: &CacheSnapshot,
        resolver: Arc<dyn Resolver>,
    ) -> ScheduleOutput {
        // Held until the run ends so an absent external signal never reads as closed
        let (_never_cancel, fallback) = watch::channel(false);
        let shutdown = self.shutdown.clone().unwrap_or(fallback);

        let ctx = UnitContext {
            cache: cache.clone(),
            resolver,
            error_log: self.error_log.clone(),
            progress: self.progress.clone(),
            retry: self.retry,
            shutdown,
        };

        tracing::debug!(
            keys = keys.len(),
            concurrency = self.concurrency,
            mode = ?self.mode,
            "Scheduling keys"
        );

        let mut collector = Collector::with_capacity(keys.len());
        match self.mode {
            SchedulingMode::Pool => self.run_pool(keys, ctx.clone(), &mut collector).await,
            SchedulingMode::Batched => self.run_batched(keys, ctx.clone(), &mut collector).await,
        }

        collector.finish(ctx.is_shutdown())
    }

    async fn run_pool(&self, keys: Vec<String>, ctx: UnitContext, collector: &mut Collector) {
        let mut queue = VecDeque::with_capacity(keys.len());
        for key in keys {
            match ctx.cached(&key) {
                Some(outcome) => {
                    ctx.complete();
                    collector.accept(Unit::Cached(outcome));
                }
                None => queue.push_back(key),
            }
        }

        if queue.is_empty() {
            return;
        }

        let worker_count = self.concurrency.min(queue.len());
        let queue = Arc::new(Mutex::new(queue));
        let (tx, mut rx) = mpsc::unbounded_channel::<Unit>();

        let workers: Vec<_> = (0..worker_count)
            .map(|worker_id| {
                let ctx = ctx.clone();
                let queue = queue.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    loop {
                        if ctx.is_shutdown() {
                            break;
                        }
                        let Some(key) = pop_key(&queue) else {
                            break;
                        };
                        let unit = ctx.resolve(key).await;
                        if tx.send(unit).is_err() {
                            break;
                        }
                    }
                    tracing::trace!(worker_id, "Worker finished");
                })
            })
            .collect();
        drop(tx);

        while let Some(unit) = rx.recv().await {
            collector.accept(unit);
        }

        for (worker_id, joined) in join_all(workers).await.into_iter().enumerate() {
            if let Err(e) = joined {
                tracing::error!(worker_id, error = %e, "Worker task terminated abnormally");
            }
        }

        let leftover = match queue.lock() {
            Ok(mut queue) => queue.drain(..).collect::<Vec<_>>(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        collector.unfinished.extend(leftover);
    }

    async fn run_batched(&self, keys: Vec<String>, ctx: UnitContext, collector: &mut Collector) {
        let groups: Vec<&[String]> = keys.chunks(self.concurrency).collect();

        for (index, group) in groups.iter().enumerate() {
            if ctx.is_shutdown() {
                for rest in &groups[index..] {
                    collector.unfinished.extend(rest.iter().cloned());
                }
                break;
            }

            let handles: Vec<_> = group
                .iter()
                .cloned()
                .map(|key| {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        match ctx.cached(&key) {
                            Some(outcome) => {
                                ctx.complete();
                                Unit::Cached(outcome)
                            }
                            None => ctx.resolve(key).await,
                        }
                    })
                })
                .collect();

            // Barrier: the next group starts only after this one is done
            let joined = join_all(handles).await;
            for (key, joined) in group.iter().zip(joined) {
                match joined {
                    Ok(unit) => collector.accept(unit),
                    Err(e) => {
                        tracing::error!(
                            key = %key,
                            error = %e,
                            "Unit of work terminated abnormally"
                        );
                        ctx.complete();
                        collector.accept(Unit::Resolved(Outcome::failed(key)));
                    }
                }
            }

            tracing::debug!(group = index + 1, groups = groups.len(), "Group complete");
        }
    }
}

fn pop_key(queue: &Mutex<VecDeque<String>>) -> Option<String> {
    match queue.lock() {
        Ok(mut queue) => queue.pop_front(),
        Err(poisoned) => poisoned.into_inner().pop_front(),
    }
}

/// Result of one unit of work
enum Unit {
    Cached(Outcome),
    Resolved(Outcome),
    /// Cancelled before an attempt could start
    Abandoned(String),
}

/// Shared, read-only state handed to every unit of work
#[derive(Clone)]
struct UnitContext {
    cache: CacheSnapshot,
    resolver: Arc<dyn Resolver>,
    error_log: Arc<dyn ErrorLog>,
    progress: Option<Arc<dyn ProgressReporter>>,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl UnitContext {
    fn cached(&self, key: &str) -> Option<Outcome> {
        self.cache
            .get(key)
            .map(|entry| Outcome::from_cache(key, entry))
    }

    fn complete(&self) {
        if let Some(progress) = &self.progress {
            progress.on_unit_complete();
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn resolve(&self, key: String) -> Unit {
        let attempt = AssertUnwindSafe(self.retry.resolve(
            &key,
            self.resolver.as_ref(),
            self.error_log.as_ref(),
            &self.shutdown,
        ))
        .catch_unwind()
        .await;

        match attempt {
            Ok(Some(outcome)) => {
                self.complete();
                Unit::Resolved(outcome)
            }
            Ok(None) => Unit::Abandoned(key),
            Err(_) => {
                tracing::error!(key = %key, "Resolver panicked; recording key as failed");
                self.complete();
                Unit::Resolved(Outcome::failed(key))
            }
        }
    }
}

/// Single owner of the result set while a run is in progress
struct Collector {
    results: ResultSet,
    cache_hits: usize,
    unfinished: Vec<String>,
}

impl Collector {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            results: ResultSet::with_capacity(capacity),
            cache_hits: 0,
            unfinished: Vec::new(),
        }
    }

    fn accept(&mut self, unit: Unit) {
        match unit {
            Unit::Cached(outcome) => {
                self.cache_hits += 1;
                self.results.push(outcome);
            }
            Unit::Resolved(outcome) => self.results.push(outcome),
            Unit::Abandoned(key) => self.unfinished.push(key),
        }
    }

    fn finish(self, shutdown: bool) -> ScheduleOutput {
        ScheduleOutput {
            results: self.results,
            cache_hits: self.cache_hits,
            cancelled: shutdown && !self.unfinished.is_empty(),
            unfinished: self.unfinished,
        }
    }
}

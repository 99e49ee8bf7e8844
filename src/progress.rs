//! Progress reporting
//!
//! Receives one completion event per unit of work, from any task, in
//! completion order.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Observer of completed units of work
pub trait ProgressReporter: Send + Sync {
    /// Called exactly once per completed unit (cache hit or resolution)
    fn on_unit_complete(&self);

    /// Units completed so far; never decreases
    fn completed(&self) -> usize;
}

/// Lock-free counter that logs progress through `tracing`
#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    log_every: usize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        // Roughly every 10%, never less than once per unit
        let log_every = (total / 10).max(1);
        Self {
            total,
            completed: AtomicUsize::new(0),
            log_every,
        }
    }

    pub fn with_log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every.max(1);
        self
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl ProgressReporter for ProgressTracker {
    fn on_unit_complete(&self) {
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if done % self.log_every == 0 || done == self.total {
            let percent = if self.total == 0 {
                100.0
            } else {
                done as f64 * 100.0 / self.total as f64
            };
            tracing::info!(
                completed = done,
                total = self.total,
                percent = %format!("{:.1}", percent),
                "Resolving profiles"
            );
        }
    }

    fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }
}

//! Retry policy
//!
//! Turns up to `max_attempts` resolver attempts into one terminal outcome.
//! A match or a clean no-match ends the loop at once; only errors are
//! retried, after a fixed backoff.

use std::time::Duration;

use tokio::sync::watch;

use crate::error_log::ErrorLog;
use crate::resolver::Resolver;
use crate::types::{Lookup, Outcome};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Constant wait between a failed attempt and the next one
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Resolve one key
    ///
    /// Returns `None` only when shutdown was signalled before an attempt
    /// could start; the key then has no outcome for this run.
    pub async fn resolve(
        &self,
        key: &str,
        resolver: &dyn Resolver,
        error_log: &dyn ErrorLog,
        shutdown: &watch::Receiver<bool>,
    ) -> Option<Outcome> {
        let mut shutdown = shutdown.clone();
        let max_attempts = self.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if *shutdown.borrow() {
                tracing::debug!(key, attempt, "Shutdown requested, abandoning key");
                return None;
            }

            match resolver.lookup(key).await {
                Ok(Lookup::Match(url)) => {
                    tracing::debug!(key, attempt, url = %url, "Resolved");
                    return Some(Outcome::success(key, url));
                }
                Ok(Lookup::NoMatch) => {
                    tracing::debug!(key, attempt, "No match");
                    return Some(Outcome::not_found(key));
                }
                Err(e) => {
                    let detail = e.to_string();
                    tracing::warn!(
                        key,
                        attempt,
                        max_attempts,
                        error = %detail,
                        "Lookup attempt failed"
                    );
                    error_log.record(key, &detail);

                    if attempt < max_attempts {
                        self.wait_backoff(&mut shutdown).await;
                    }
                }
            }
        }

        tracing::warn!(key, attempts = max_attempts, "Giving up after repeated errors");
        Some(Outcome::failed(key))
    }

    /// Sleep for the backoff, waking early only if shutdown is requested
    async fn wait_backoff(&self, shutdown: &mut watch::Receiver<bool>) {
        let sleep = tokio::time::sleep(self.backoff);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone; nobody can cancel any more
                        (&mut sleep).await;
                        return;
                    }
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

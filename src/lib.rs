//! Bulk profile resolution engine
//!
//! Resolves a company's profile URL for every key in a list by calling an
//! external search service with bounded concurrency, fixed-backoff retries
//! and a persisted result cache that lets reruns skip finished keys.
//!
//! ```text
//! keys -> Scheduler -> (cache check -> RetryPolicy -> Resolver) -> ResultSet -> output CSV
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod error_log;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use cache::{CachePolicy, CacheSnapshot, ResultCache};
pub use config::{EngineConfig, SchedulingMode};
pub use engine::{ResolutionEngine, RunReport};
pub use error::{EngineError, ResolveError};
pub use error_log::{ErrorLog, FileErrorLog, MemoryErrorLog};
pub use progress::{ProgressReporter, ProgressTracker};
pub use resolver::{Resolver, SerpApiClient, SerpApiConfig};
pub use retry::RetryPolicy;
pub use scheduler::{ScheduleOutput, Scheduler};
pub use types::{CacheEntry, Lookup, Outcome, OutcomeStatus, ResultSet, NOT_FOUND_SENTINEL};

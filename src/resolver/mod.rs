//! Resolver boundary
//!
//! A resolver performs exactly one lookup attempt per call. Query
//! construction and credentials belong to the implementation; the engine
//! only sees `Lookup` or `ResolveError`.

pub mod serpapi;
pub mod types;

use async_trait::async_trait;

use crate::error::ResolveError;
use crate::types::Lookup;

pub use serpapi::{SerpApiClient, SerpApiConfig};

/// One lookup attempt against the external search service
///
/// `Ok(Lookup::NoMatch)` is a definitive answer and is never retried.
/// `Err(_)` is treated as transient.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Lookup, ResolveError>;
}

//! SerpAPI client
//!
//! Rate-limited HTTP resolver that searches Google through SerpAPI for a
//! company's LinkedIn company page.

use super::types::SearchResponse;
use super::Resolver;
use crate::error::ResolveError;
use crate::types::Lookup;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use url::Url;

pub const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search.json";
const PROFILE_MARKER: &str = "linkedin.com/company";
const NO_RESULTS_MARKER: &str = "hasn't returned any results";
const ERROR_BODY_LIMIT: usize = 200;

/// Connection settings for the SerpAPI resolver
#[derive(Clone)]
pub struct SerpApiConfig {
    pub api_key: String,
    pub endpoint: String,
    pub timeout: Duration,
    /// Minimum spacing between consecutive requests from this client
    pub request_interval: Duration,
}

impl SerpApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: SERPAPI_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            request_interval: Duration::from_millis(100),
        }
    }
}

impl std::fmt::Debug for SerpApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerpApiConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("request_interval", &self.request_interval)
            .finish()
    }
}

/// SerpAPI resolver
pub struct SerpApiClient {
    http: Client,
    config: SerpApiConfig,
    next_slot: Mutex<Instant>,
}

impl SerpApiClient {
    pub fn new(config: SerpApiConfig) -> Result<Self> {
        Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid search endpoint '{}'", config.endpoint))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            config,
            next_slot: Mutex::new(Instant::now()),
        })
    }

    /// Reserve the next request slot and wait for it
    async fn rate_limit(&self) {
        let wait = {
            let mut next = match self.next_slot.lock() {
                Ok(next) => next,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.config.request_interval;
            slot - now
        };

        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    fn search_url(&self, key: &str) -> Result<Url, ResolveError> {
        build_search_url(&self.config.endpoint, &self.config.api_key, key)
    }
}

#[async_trait]
impl Resolver for SerpApiClient {
    async fn lookup(&self, key: &str) -> Result<Lookup, ResolveError> {
        let url = self.search_url(key)?;
        self.rate_limit().await;

        tracing::debug!(key, "Searching for company profile");

        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ResolveError::Http(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::Http(e.without_url()))?;

        if !status.is_success() {
            return Err(ResolveError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let parsed: SearchResponse = serde_json::from_str(&body)?;
        interpret_response(&parsed)
    }
}

/// Query sent for one key
pub fn search_query(key: &str) -> String {
    format!("{} LinkedIn site:{}", key, PROFILE_MARKER)
}

pub fn build_search_url(endpoint: &str, api_key: &str, key: &str) -> Result<Url, ResolveError> {
    Url::parse_with_params(
        endpoint,
        &[
            ("engine", "google"),
            ("q", search_query(key).as_str()),
            ("api_key", api_key),
        ],
    )
    .map_err(|e| ResolveError::Other(format!("invalid search endpoint: {}", e)))
}

/// First organic result pointing at a company page wins
pub fn interpret_response(response: &SearchResponse) -> Result<Lookup, ResolveError> {
    let matched = response
        .organic_results
        .iter()
        .filter_map(|r| r.link.as_deref())
        .find(|link| link.contains(PROFILE_MARKER));

    if let Some(link) = matched {
        return Ok(Lookup::Match(link.to_string()));
    }

    match response.error.as_deref() {
        Some(err) if !err.contains(NO_RESULTS_MARKER) => {
            Err(ResolveError::Service(err.to_string()))
        }
        _ => Ok(Lookup::NoMatch),
    }
}

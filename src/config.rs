//! Engine configuration
//!
//! Built once at process start and passed into the engine explicitly.
//! Sources in increasing precedence: built-in defaults, an optional YAML
//! file, environment variables, then command-line flags (applied by the
//! binary).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CachePolicy;
use crate::error::EngineError;
use crate::resolver::serpapi::SERPAPI_ENDPOINT;
use crate::resolver::SerpApiConfig;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::scheduler::DEFAULT_CONCURRENCY;

pub const ENV_API_KEY: &str = "SERPAPI_API_KEY";
pub const ENV_CONCURRENCY: &str = "RESOLVER_CONCURRENCY";
pub const ENV_MAX_ATTEMPTS: &str = "RESOLVER_MAX_ATTEMPTS";
pub const ENV_BACKOFF_MS: &str = "RESOLVER_BACKOFF_MS";

/// How units of work are fanned out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingMode {
    /// Fixed set of workers draining a shared queue
    #[default]
    Pool,
    /// Groups of `concurrency` keys, each joined before the next starts
    Batched,
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Search service credential
    pub api_key: String,
    pub input_path: Option<PathBuf>,
    /// Results table; also read back as the cache on the next run
    pub output_path: PathBuf,
    pub error_log_path: PathBuf,
    /// Zero-based column holding the key in the input table
    pub key_column: usize,
    pub input_has_header: bool,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub scheduling: SchedulingMode,
    pub cache_policy: CachePolicy,
    pub endpoint: String,
    pub request_timeout_secs: u64,
    pub request_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            input_path: None,
            output_path: PathBuf::from("linkedin_urls.csv"),
            error_log_path: PathBuf::from("error_log.txt"),
            key_column: 0,
            input_has_header: false,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: 2_000,
            scheduling: SchedulingMode::Pool,
            cache_policy: CachePolicy::ReuseAll,
            endpoint: SERPAPI_ENDPOINT.to_string(),
            request_timeout_secs: 30,
            request_interval_ms: 100,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let api_key = if self.api_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("EngineConfig")
            .field("api_key", &api_key)
            .field("input_path", &self.input_path)
            .field("output_path", &self.output_path)
            .field("error_log_path", &self.error_log_path)
            .field("key_column", &self.key_column)
            .field("input_has_header", &self.input_has_header)
            .field("concurrency", &self.concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_ms", &self.backoff_ms)
            .field("scheduling", &self.scheduling)
            .field("cache_policy", &self.cache_policy)
            .field("endpoint", &self.endpoint)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("request_interval_ms", &self.request_interval_ms)
            .finish()
    }
}

impl EngineConfig {
    /// Load from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
    }

    /// Defaults, then the optional file, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Override fields from environment-style lookups
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.api_key = key.trim().to_string();
        }
        if let Some(value) = lookup(ENV_CONCURRENCY) {
            self.concurrency = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_CONCURRENCY))?;
        }
        if let Some(value) = lookup(ENV_MAX_ATTEMPTS) {
            self.max_attempts = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_MAX_ATTEMPTS))?;
        }
        if let Some(value) = lookup(ENV_BACKOFF_MS) {
            self.backoff_ms = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be milliseconds", ENV_BACKOFF_MS))?;
        }
        Ok(())
    }

    /// Check invariants the engine relies on
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.concurrency == 0 {
            return Err(EngineError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(EngineError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(EngineError::Config(format!(
                "no search API key configured (set {} or api_key)",
                ENV_API_KEY
            )));
        }
        if self.input_path.is_none() {
            return Err(EngineError::Config("no input file configured".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }

    pub fn serp_api_config(&self) -> SerpApiConfig {
        SerpApiConfig {
            api_key: self.api_key.clone(),
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            request_interval: Duration::from_millis(self.request_interval_ms),
        }
    }
}

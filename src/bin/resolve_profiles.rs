//! Bulk LinkedIn profile resolver
//!
//! Reads company names from a CSV file, resolves each one to a LinkedIn
//! company URL through the search API and writes `linkedin_urls.csv`.
//! Rows already present in the output file are reused on the next run.
//!
//! Usage:
//!   SERPAPI_API_KEY=... cargo run --bin resolve_profiles -- \
//!     --input companies.csv \
//!     --concurrency 10
//!
//! Examples:
//!   # Header row, names in the second column, retry earlier failures
//!   cargo run --bin resolve_profiles -- -i companies.csv \
//!     --has-header --key-column 1 --retry-failed
//!
//!   # Group-at-a-time scheduling and a JSON run report
//!   cargo run --bin resolve_profiles -- -i companies.csv --batched --json

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;

use profile_resolver::storage::KeySource;
use profile_resolver::{
    CachePolicy, EngineConfig, FileErrorLog, ResolutionEngine, RunReport, SchedulingMode,
    SerpApiClient,
};

/// Resolve LinkedIn company URLs in bulk
#[derive(Parser, Debug)]
#[command(name = "resolve_profiles")]
#[command(about = "Resolve LinkedIn company URLs for a list of company names")]
struct Args {
    /// Input CSV with one company name per row
    #[arg(long, short = 'i')]
    input: Option<PathBuf>,

    /// Output CSV, also used as the cache for later runs
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// File that receives one line per failed lookup attempt
    #[arg(long)]
    error_log: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Maximum concurrent lookups
    #[arg(long, short = 'w')]
    concurrency: Option<usize>,

    /// Attempts per company before it is recorded as failed
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Wait between attempts, in milliseconds
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Zero-based column holding the company name
    #[arg(long)]
    key_column: Option<usize>,

    /// The input file starts with a header row
    #[arg(long)]
    has_header: bool,

    /// Resolve in fixed groups instead of a worker pool
    #[arg(long)]
    batched: bool,

    /// Resolve companies whose cached status is Failed again
    #[arg(long)]
    retry_failed: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Command-line flags take precedence over file and environment
    fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(input) = &self.input {
            config.input_path = Some(input.clone());
        }
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }
        if let Some(error_log) = &self.error_log {
            config.error_log_path = error_log.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(backoff_ms) = self.backoff_ms {
            config.backoff_ms = backoff_ms;
        }
        if let Some(key_column) = self.key_column {
            config.key_column = key_column;
        }
        if self.has_header {
            config.input_has_header = true;
        }
        if self.batched {
            config.scheduling = SchedulingMode::Batched;
        }
        if self.retry_failed {
            config.cache_policy = CachePolicy::RetryFailed;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("{} {}", "ERROR:".red().bold(), e);
        std::process::exit(2);
    }
    tracing::debug!(?config, "Configuration loaded");

    let input = config
        .input_path
        .clone()
        .context("no input file configured")?;
    let keys = KeySource::new(&input)
        .with_key_column(config.key_column)
        .with_header(config.input_has_header)
        .load_keys()?;

    let error_log = Arc::new(FileErrorLog::open(&config.error_log_path)?);
    let resolver = Arc::new(SerpApiClient::new(config.serp_api_config())?);

    // Ctrl-C stops new lookups; finished results are still saved
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight lookups");
            let _ = shutdown_tx.send(true);
        }
    });

    let engine = ResolutionEngine::from_config(&config, resolver, error_log)
        .with_shutdown(shutdown_rx);
    let report = engine.run(keys).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("\n{}", "═".repeat(60));
    println!("{}", "RESOLUTION SUMMARY".cyan().bold());
    println!("{}", "═".repeat(60));
    println!("Run:          {}", report.run_id.to_string().dimmed());
    println!("Companies:    {}", report.total_keys);
    println!("Cached:       {}", report.cache_hits);
    println!("Looked up:    {}", report.resolved);
    println!(
        "Success:      {}",
        report.success_count.to_string().green()
    );
    println!(
        "Not found:    {}",
        report.not_found_count.to_string().yellow()
    );
    println!("Failed:       {}", report.failed_count.to_string().red());
    println!("Duration:     {:.2}s", report.duration_ms as f64 / 1000.0);
    if report.cancelled {
        println!(
            "{} run interrupted, {} rows saved",
            "WARNING:".yellow(),
            report.rows_written
        );
    }
    println!(
        "\nLinkedIn URLs saved to {}",
        report.output_path.display().to_string().bold()
    );
}

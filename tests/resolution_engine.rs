//! End-to-end runs of the resolution engine against an in-process search
//! double, with the cache, input and error log on disk.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use profile_resolver::storage::{self, KeySource};
use profile_resolver::{
    CachePolicy, FileErrorLog, Lookup, MemoryErrorLog, OutcomeStatus, ResolutionEngine,
    ResolveError, Resolver, ResultCache, RetryPolicy, SchedulingMode, NOT_FOUND_SENTINEL,
};

/// Search double: scripted responses per key, otherwise a match
#[derive(Default)]
struct FakeSearch {
    scripts: Mutex<HashMap<String, VecDeque<Result<Lookup, ResolveError>>>>,
    calls: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl FakeSearch {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn script(self, key: &str, responses: Vec<Result<Lookup, ResolveError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), responses.into_iter().collect());
        self
    }

    fn always_error(self, key: &str, times: usize) -> Self {
        let responses = (0..times)
            .map(|_| Err(ResolveError::Service("rate limited".into())))
            .collect();
        self.script(key, responses)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls_for(&self, key: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, at)| *at)
            .collect()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn profile_url(key: &str) -> String {
    format!(
        "https://www.linkedin.com/company/{}",
        key.to_lowercase().replace(' ', "-")
    )
}

#[async_trait]
impl Resolver for FakeSearch {
    async fn lookup(&self, key: &str) -> Result<Lookup, ResolveError> {
        self.calls
            .lock()
            .unwrap()
            .push((key.to_string(), Instant::now()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| Ok(Lookup::Match(profile_url(key))))
    }
}

fn companies(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("Company {}", i)).collect()
}

fn engine(
    resolver: Arc<FakeSearch>,
    output: &Path,
    policy: CachePolicy,
    concurrency: usize,
) -> ResolutionEngine {
    ResolutionEngine::new(
        resolver,
        ResultCache::new(output, policy),
        Arc::new(MemoryErrorLog::new()),
    )
    .with_concurrency(concurrency)
    .with_retry(RetryPolicy::new(3, Duration::from_secs(2)))
}

fn saved_rows(path: &Path) -> HashMap<String, (String, OutcomeStatus)> {
    storage::read_outcome_rows(path)
        .unwrap()
        .into_iter()
        .map(|(key, entry, _)| (key, (entry.value, entry.status)))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_one_row_per_unique_key() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");
    let keys = companies(20);

    for mode in [SchedulingMode::Pool, SchedulingMode::Batched] {
        let _ = std::fs::remove_file(&output);
        let resolver = Arc::new(FakeSearch::with_delay(Duration::from_millis(30)));
        let report = engine(resolver.clone(), &output, CachePolicy::ReuseAll, 4)
            .with_mode(mode)
            .run(keys.clone())
            .await
            .unwrap();

        assert_eq!(report.total_keys, 20);
        assert_eq!(report.success_count, 20);
        assert!(!report.cancelled);

        let rows = storage::read_outcome_rows(&output).unwrap();
        assert_eq!(rows.len(), 20);
        let saved: HashSet<String> = rows.into_iter().map(|(key, _, _)| key).collect();
        let expected: HashSet<String> = keys.iter().cloned().collect();
        assert_eq!(saved, expected);
    }
}

#[tokio::test]
async fn test_cached_success_is_never_looked_up() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");
    std::fs::write(
        &output,
        "Company Name,LinkedIn URL,Status\n\
         Acme,https://www.linkedin.com/company/acme-corp,Success\n",
    )
    .unwrap();

    let resolver = Arc::new(FakeSearch::default());
    let report = engine(resolver.clone(), &output, CachePolicy::ReuseAll, 2)
        .run(vec!["Acme".to_string(), "Globex".to_string()])
        .await
        .unwrap();

    assert_eq!(report.cache_hits, 1);
    assert_eq!(report.resolved, 1);
    assert!(resolver.calls_for("Acme").is_empty());

    let rows = saved_rows(&output);
    assert_eq!(
        rows["Acme"],
        (
            "https://www.linkedin.com/company/acme-corp".to_string(),
            OutcomeStatus::Success
        )
    );
    assert_eq!(rows["Globex"].0, profile_url("Globex"));
}

#[tokio::test(start_paused = true)]
async fn test_no_match_is_final_after_one_call() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");
    let resolver = Arc::new(FakeSearch::default().script("Globex", vec![Ok(Lookup::NoMatch)]));

    let report = engine(resolver.clone(), &output, CachePolicy::ReuseAll, 2)
        .run(vec!["Globex".to_string()])
        .await
        .unwrap();

    assert_eq!(report.not_found_count, 1);
    assert_eq!(resolver.calls_for("Globex").len(), 1);
    assert_eq!(
        saved_rows(&output)["Globex"],
        (NOT_FOUND_SENTINEL.to_string(), OutcomeStatus::NotFound)
    );
}

#[tokio::test(start_paused = true)]
async fn test_persistent_errors_fail_after_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");
    let log_path = dir.path().join("error_log.txt");
    let resolver = Arc::new(FakeSearch::default().always_error("Initech", 3));

    let report = ResolutionEngine::new(
        resolver.clone(),
        ResultCache::new(&output, CachePolicy::ReuseAll),
        Arc::new(FileErrorLog::open(&log_path).unwrap()),
    )
    .with_retry(RetryPolicy::new(3, Duration::from_secs(2)))
    .run(vec!["Initech".to_string(), "Hooli".to_string()])
    .await
    .unwrap();

    assert_eq!(report.failed_count, 1);
    assert_eq!(report.success_count, 1);

    let calls = resolver.calls_for("Initech");
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_secs(2), "gap too short: {:?}", gap);
        assert!(gap < Duration::from_millis(2_100), "gap too long: {:?}", gap);
    }

    let log = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = log
        .lines()
        .filter(|line| line.starts_with("Error fetching Initech:"))
        .collect();
    assert_eq!(lines.len(), 3);
    assert!(!log.contains("Hooli"));

    assert_eq!(
        saved_rows(&output)["Initech"],
        (NOT_FOUND_SENTINEL.to_string(), OutcomeStatus::Failed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_single_error_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");
    let log = Arc::new(MemoryErrorLog::new());
    let resolver = Arc::new(FakeSearch::default().script(
        "Hooli",
        vec![
            Err(ResolveError::Status {
                status: 429,
                body: "too many requests".into(),
            }),
            Ok(Lookup::Match(profile_url("Hooli"))),
        ],
    ));

    let report = ResolutionEngine::new(
        resolver.clone(),
        ResultCache::new(&output, CachePolicy::ReuseAll),
        log.clone(),
    )
    .run(vec!["Hooli".to_string()])
    .await
    .unwrap();

    assert_eq!(report.success_count, 1);
    assert_eq!(resolver.calls_for("Hooli").len(), 2);
    assert_eq!(log.lines_for("Hooli").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_does_no_resolution_work() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");
    let mut keys = companies(6);
    keys.push("Globex".to_string());
    keys.push("Initech".to_string());

    let first = Arc::new(
        FakeSearch::default()
            .script("Globex", vec![Ok(Lookup::NoMatch)])
            .always_error("Initech", 3),
    );
    let report = engine(first.clone(), &output, CachePolicy::ReuseAll, 3)
        .run(keys.clone())
        .await
        .unwrap();
    assert_eq!(report.resolved, 8);
    let first_rows = saved_rows(&output);

    let second = Arc::new(FakeSearch::default());
    let report = engine(second.clone(), &output, CachePolicy::ReuseAll, 3)
        .run(keys)
        .await
        .unwrap();

    assert_eq!(second.total_calls(), 0);
    assert_eq!(report.cache_hits, 8);
    assert_eq!(report.resolved, 0);
    assert_eq!(saved_rows(&output), first_rows);
}

#[tokio::test(start_paused = true)]
async fn test_retry_failed_policy_resolves_failed_rows_again() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");
    std::fs::write(
        &output,
        "Company Name,LinkedIn URL,Status\n\
         Acme,https://www.linkedin.com/company/acme,Success\n\
         Globex,LinkedIn URL not found,Not Found\n\
         Initech,LinkedIn URL not found,Failed\n",
    )
    .unwrap();
    let keys = vec![
        "Acme".to_string(),
        "Globex".to_string(),
        "Initech".to_string(),
    ];

    let resolver = Arc::new(FakeSearch::default());
    let report = engine(resolver.clone(), &output, CachePolicy::RetryFailed, 2)
        .run(keys)
        .await
        .unwrap();

    assert_eq!(resolver.total_calls(), 1);
    assert_eq!(resolver.calls_for("Initech").len(), 1);
    assert_eq!(report.cache_hits, 2);
    assert_eq!(
        saved_rows(&output)["Initech"],
        (profile_url("Initech"), OutcomeStatus::Success)
    );
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_lookups_bounded_by_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");

    for (mode, concurrency) in [
        (SchedulingMode::Pool, 5),
        (SchedulingMode::Batched, 5),
        (SchedulingMode::Pool, 1),
    ] {
        let _ = std::fs::remove_file(&output);
        let resolver = Arc::new(FakeSearch::with_delay(Duration::from_millis(100)));
        engine(resolver.clone(), &output, CachePolicy::ReuseAll, concurrency)
            .with_mode(mode)
            .run(companies(40))
            .await
            .unwrap();

        assert_eq!(resolver.total_calls(), 40);
        assert!(
            resolver.peak() <= concurrency,
            "{:?}: peak {} over bound {}",
            mode,
            resolver.peak(),
            concurrency
        );
        assert_eq!(resolver.peak(), concurrency);
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_keeps_prior_rows() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");
    std::fs::write(
        &output,
        "Company Name,LinkedIn URL,Status\n\
         Zeta,https://www.linkedin.com/company/zeta,Success\n",
    )
    .unwrap();

    let resolver = Arc::new(FakeSearch::with_delay(Duration::from_millis(50)));
    let (tx, rx) = watch::channel(false);
    let engine = engine(resolver.clone(), &output, CachePolicy::ReuseAll, 2)
        .with_shutdown(rx);

    let run = engine.run(companies(10));
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
    };
    let (report, _) = tokio::join!(run, cancel);
    let report = report.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.resolved, 2);
    assert_eq!(report.rows_written, 3);

    let rows = saved_rows(&output);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows["Zeta"].1, OutcomeStatus::Success);
    assert!(rows.contains_key("Company 0"));
    assert!(rows.contains_key("Company 1"));
}

#[tokio::test]
async fn test_keys_from_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("companies.csv");
    let output = dir.path().join("linkedin_urls.csv");
    std::fs::write(&input, "name,country\nAcme,US\n\nGlobex,DE\n").unwrap();

    let keys = KeySource::new(&input).with_header(true).load_keys().unwrap();
    assert_eq!(keys, vec!["Acme".to_string(), "Globex".to_string()]);

    let resolver = Arc::new(FakeSearch::default());
    let report = engine(resolver, &output, CachePolicy::ReuseAll, 10)
        .run(keys)
        .await
        .unwrap();

    assert_eq!(report.success_count, 2);
    assert_eq!(report.output_path, output);
    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.starts_with("Company Name,LinkedIn URL,Status\n"));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_retry_failed_run_keeps_unreached_failed_rows() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("linkedin_urls.csv");
    std::fs::write(
        &output,
        "Company Name,LinkedIn URL,Status\n\
         Acme,https://www.linkedin.com/company/acme,Success\n\
         Initech,LinkedIn URL not found,Failed\n\
         Umbrella,LinkedIn URL not found,Failed\n",
    )
    .unwrap();
    let keys = vec![
        "Company 0".to_string(),
        "Company 1".to_string(),
        "Initech".to_string(),
        "Umbrella".to_string(),
    ];

    let resolver = Arc::new(FakeSearch::with_delay(Duration::from_millis(50)));
    let (tx, rx) = watch::channel(false);
    let engine = engine(resolver.clone(), &output, CachePolicy::RetryFailed, 1)
        .with_shutdown(rx);

    let run = engine.run(keys);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
    };
    let (report, _) = tokio::join!(run, cancel);
    let report = report.unwrap();

    assert!(report.cancelled);
    assert!(resolver.calls_for("Initech").is_empty());

    let rows = saved_rows(&output);
    assert_eq!(rows.len(), 4);
    assert!(rows.contains_key("Company 0"));
    assert_eq!(rows["Acme"].1, OutcomeStatus::Success);
    assert_eq!(
        rows["Initech"],
        (NOT_FOUND_SENTINEL.to_string(), OutcomeStatus::Failed)
    );
    assert_eq!(
        rows["Umbrella"],
        (NOT_FOUND_SENTINEL.to_string(), OutcomeStatus::Failed)
    );
}

//! Fetch client for the bibliographic API
//!
//! Provides:
//! - The `MetadataSource` seam the worker depends on
//! - The retry machine (`FetchClient`) over a single-attempt `Transport`
//! - The Crossref and OpenAlex transports and their record mapping

pub mod crossref;
mod http;
pub mod openalex;
pub mod record;

pub use crossref::CrossrefTransport;
pub use openalex::OpenAlexTransport;
pub use record::FetchedRecord;

use async_trait::async_trait;
use citecrawl_common::config::FetchConfig;
use citecrawl_common::metrics::{self, FetchTimer};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Terminal fetch outcomes other than success
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("no record matches the title")]
    NotFound,

    #[error("rate limited again after waiting")]
    RateLimited,

    #[error("gave up after {attempts} attempts: {reason}")]
    Transient { attempts: u32, reason: String },

    #[error("record is missing {field}")]
    Incomplete { field: &'static str },
}

impl FetchError {
    /// Label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::Incomplete { .. } => "incomplete",
        }
    }
}

/// Resolves a free-text title to one record
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, title: &str) -> Result<FetchedRecord, FetchError>;

    /// Retries spent so far, for the run summary
    fn retry_count(&self) -> u64 {
        0
    }
}

/// Result of one outbound request
#[derive(Debug)]
pub enum AttemptResult {
    Found(FetchedRecord),
    NotFound,
    Incomplete(&'static str),
    TooManyRequests { retry_after: Option<Duration> },
    /// Timeout, connection failure or unexpected status
    Failed(String),
}

/// Performs exactly one request per call; no retries
#[async_trait]
pub trait Transport: Send + Sync {
    async fn attempt(&self, title: &str) -> AttemptResult;
}

/// Wait schedule for failed attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after transient failures; total attempts are one more
    pub max_retries: u32,
    /// Base wait after a 429 without `Retry-After`
    pub rate_limit_window: Duration,
    /// Upper bound on any 429 wait
    pub rate_limit_max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            rate_limit_window: Duration::from_secs(3600),
            rate_limit_max_wait: Duration::from_secs(6 * 3600),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            rate_limit_window: Duration::from_secs(config.rate_limit_window_secs),
            rate_limit_max_wait: Duration::from_secs(config.rate_limit_max_wait_secs),
        }
    }

    /// `2^n + U(0,1)` seconds before retry `n` (1-based)
    pub fn transient_wait(&self, retry: u32) -> Duration {
        let base = 2f64.powi(retry.min(16) as i32);
        Duration::from_secs_f64(base + rand::thread_rng().gen::<f64>())
    }

    /// Server-directed wait, else `window × U[1.0, 2.1)`, capped
    pub fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        let wait = retry_after.unwrap_or_else(|| {
            self.rate_limit_window
                .mul_f64(rand::thread_rng().gen_range(1.0..2.1))
        });
        wait.min(self.rate_limit_max_wait)
    }
}

/// Retrying metadata client over a transport
pub struct FetchClient<T> {
    transport: T,
    policy: RetryPolicy,
    retries: AtomicU64,
}

impl<T: Transport> FetchClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            retries: AtomicU64::new(0),
        }
    }

    fn note_retry(&self, reason: &'static str) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        metrics::record_fetch_retry(reason);
    }

    async fn run(&self, title: &str) -> Result<FetchedRecord, FetchError> {
        let mut attempts = 0u32;
        let mut transient_failures = 0u32;
        let mut rate_limited = false;

        loop {
            attempts += 1;
            metrics::record_fetch_attempt();

            match self.transport.attempt(title).await {
                AttemptResult::Found(record) => {
                    debug!(attempts, external_id = %record.external_id, "Record fetched");
                    return Ok(record);
                }
                AttemptResult::NotFound => return Err(FetchError::NotFound),
                AttemptResult::Incomplete(field) => return Err(FetchError::Incomplete { field }),
                AttemptResult::TooManyRequests { retry_after } => {
                    if rate_limited {
                        return Err(FetchError::RateLimited);
                    }
                    rate_limited = true;

                    let wait = self.policy.rate_limit_wait(retry_after);
                    warn!(
                        attempt = attempts,
                        wait_secs = wait.as_secs(),
                        server_directed = retry_after.is_some(),
                        "Rate limited, waiting before one retry"
                    );
                    self.note_retry("rate_limited");
                    tokio::time::sleep(wait).await;
                }
                AttemptResult::Failed(reason) => {
                    transient_failures += 1;
                    if transient_failures > self.policy.max_retries {
                        return Err(FetchError::Transient { attempts, reason });
                    }

                    let wait = self.policy.transient_wait(transient_failures);
                    warn!(
                        attempt = attempts,
                        max_retries = self.policy.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %reason,
                        "Fetch failed, retrying"
                    );
                    self.note_retry("transient");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[async_trait]
impl<T: Transport> MetadataSource for FetchClient<T> {
    #[instrument(skip(self))]
    async fn fetch(&self, title: &str) -> Result<FetchedRecord, FetchError> {
        let timer = FetchTimer::start();
        let result = self.run(title).await;
        timer.finish(match &result {
            Ok(_) => "found",
            Err(e) => e.kind(),
        });
        result
    }

    fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    pub(crate) fn record(doi: &str, title: &str, refs: &[&str]) -> FetchedRecord {
        FetchedRecord {
            external_id: doi.to_string(),
            title: title.to_string(),
            year: Some(2020),
            abstract_text: String::new(),
            authors: Vec::new(),
            citation_count: 0,
            link: None,
            kind: Some("journal-article".to_string()),
            subjects: Vec::new(),
            referenced_titles: refs.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Plays back a fixed list of attempt results, then repeats the last
    struct Scripted {
        script: Mutex<VecDeque<AttemptResult>>,
        calls: AtomicU64,
    }

    impl Scripted {
        fn new(script: Vec<AttemptResult>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU64::new(0),
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn attempt(&self, _title: &str) -> AttemptResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                return script.pop_front().unwrap();
            }
            match script.front().unwrap() {
                AttemptResult::Failed(r) => AttemptResult::Failed(r.clone()),
                AttemptResult::TooManyRequests { retry_after } => {
                    AttemptResult::TooManyRequests { retry_after: *retry_after }
                }
                AttemptResult::NotFound => AttemptResult::NotFound,
                AttemptResult::Incomplete(f) => AttemptResult::Incomplete(f),
                AttemptResult::Found(r) => AttemptResult::Found(r.clone()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let client = FetchClient::new(
            Scripted::new(vec![AttemptResult::Found(record("10.1/abc", "GNN", &[]))]),
            RetryPolicy::default(),
        );

        let start = Instant::now();
        let found = client.fetch("graph neural networks").await.unwrap();
        assert_eq!(found.external_id, "10.1/abc");
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(client.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_once_honours_retry_after() {
        let client = FetchClient::new(
            Scripted::new(vec![
                AttemptResult::TooManyRequests { retry_after: Some(Duration::from_secs(10)) },
                AttemptResult::Found(record("10.1/abc", "GNN", &[])),
            ]),
            RetryPolicy::default(),
        );

        let start = Instant::now();
        assert!(client.fetch("gnn").await.is_ok());

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_millis(10_100));
        assert_eq!(client.retry_count(), 1);
        assert_eq!(client.transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_wait_without_header_is_randomized_window() {
        let client = FetchClient::new(
            Scripted::new(vec![
                AttemptResult::TooManyRequests { retry_after: None },
                AttemptResult::Found(record("10.1/abc", "GNN", &[])),
            ]),
            RetryPolicy::default(),
        );

        let start = Instant::now();
        assert!(client.fetch("gnn").await.is_ok());

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3600));
        assert!(elapsed < Duration::from_secs(7560));
        assert_eq!(client.retry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_429_is_terminal() {
        let client = FetchClient::new(
            Scripted::new(vec![AttemptResult::TooManyRequests { retry_after: Some(Duration::from_secs(1)) }]),
            RetryPolicy::default(),
        );

        assert_eq!(client.fetch("gnn").await.unwrap_err(), FetchError::RateLimited);
        assert_eq!(client.transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_gives_up_after_retries() {
        let client = FetchClient::new(
            Scripted::new(vec![AttemptResult::Failed("timed out".into())]),
            RetryPolicy::default(),
        );

        let start = Instant::now();
        let err = client.fetch("gnn").await.unwrap_err();

        assert!(matches!(err, FetchError::Transient { attempts: 6, .. }));
        assert_eq!(client.transport.calls(), 6);
        assert_eq!(client.retry_count(), 5);

        // 2 + 4 + 8 + 16 + 32 plus up to 1s jitter per wait
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(62) && elapsed < Duration::from_secs(67));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let client = FetchClient::new(Scripted::new(vec![AttemptResult::NotFound]), RetryPolicy::default());
        assert_eq!(client.fetch("nothing").await.unwrap_err(), FetchError::NotFound);
        assert_eq!(client.transport.calls(), 1);
    }

    #[test]
    fn test_transient_wait_bounds() {
        let policy = RetryPolicy::default();
        for n in 1..=5 {
            let wait = policy.transient_wait(n).as_secs_f64();
            let base = 2f64.powi(n as i32);
            assert!(wait >= base && wait < base + 1.0);
        }
    }

    #[test]
    fn test_rate_limit_wait_is_capped() {
        let policy = RetryPolicy {
            rate_limit_max_wait: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(policy.rate_limit_wait(Some(Duration::from_secs(600))), Duration::from_secs(60));
        assert_eq!(policy.rate_limit_wait(None), Duration::from_secs(60));
        assert_eq!(policy.rate_limit_wait(Some(Duration::from_secs(5))), Duration::from_secs(5));
    }
}

//! Per-item crawl step
//!
//! Takes one work item from claim to done: fetch, post-fetch dedup, optional
//! scope check, persistence, and republishing of referenced titles.

use crate::expand::expand;
use crate::fetch::{FetchError, FetchedRecord, MetadataSource};
use crate::heartbeat::{self, Heartbeat};
use crate::keywords::KeywordExtractor;
use crate::scope::ScopeClassifier;
use crate::stats::CrawlStats;
use citecrawl_common::config::{AppConfig, FailurePolicy};
use citecrawl_common::dedup::{ClaimToken, DedupKey, DedupStore};
use citecrawl_common::errors::{AppError, Result};
use citecrawl_common::metrics;
use citecrawl_common::{PersistenceGateway, Producer, WorkItem};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

/// Traversal settings for a worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// `None` when unbounded
    pub max_depth: Option<u32>,
    /// Pause before each republished reference
    pub politeness: Duration,
    pub failure_policy: FailurePolicy,
    /// Lease of the dedup store; held claims are renewed well within it
    pub claim_lease: Duration,
    /// Where discovered references are published
    pub topic: String,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig, topic: impl Into<String>) -> Self {
        Self {
            max_depth: config.max_depth(),
            politeness: config.politeness_delay(),
            failure_policy: config.crawler.failure_policy,
            claim_lease: config.claim_lease(),
            topic: topic.into(),
        }
    }
}

/// How an item left the worker. Every outcome is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { created: bool, published: u32 },
    /// Title or external id already claimed or done
    Duplicate,
    DepthSkipped,
    OutOfScope,
    FetchFailed(FetchError),
    PersistFailed(String),
}

impl Outcome {
    /// Label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Duplicate => "duplicate",
            Self::DepthSkipped => "depth_skipped",
            Self::OutOfScope => "out_of_scope",
            Self::FetchFailed(_) => "fetch_failed",
            Self::PersistFailed(_) => "persist_failed",
        }
    }
}

/// A claim this worker holds
struct Held<'a> {
    key: &'a DedupKey,
    token: &'a ClaimToken,
}

/// Shared by every task of a pool
pub struct Worker {
    source: Arc<dyn MetadataSource>,
    dedup: Arc<dyn DedupStore>,
    gateway: Arc<dyn PersistenceGateway>,
    producer: Producer,
    keywords: Arc<dyn KeywordExtractor>,
    scope: Option<Arc<dyn ScopeClassifier>>,
    fetch_gate: Arc<Semaphore>,
    stats: Arc<CrawlStats>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        dedup: Arc<dyn DedupStore>,
        gateway: Arc<dyn PersistenceGateway>,
        producer: Producer,
        keywords: Arc<dyn KeywordExtractor>,
        fetch_gate: Arc<Semaphore>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            source,
            dedup,
            gateway,
            producer,
            keywords,
            scope: None,
            fetch_gate,
            stats: Arc::new(CrawlStats::new()),
            settings,
        }
    }

    /// Only persist and expand papers the classifier accepts
    pub fn with_scope(mut self, scope: Arc<dyn ScopeClassifier>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn stats(&self) -> &Arc<CrawlStats> {
        &self.stats
    }

    pub fn fetch_retries(&self) -> u64 {
        self.source.retry_count()
    }

    /// Process one item.
    ///
    /// `Ok` means the item is settled and may be acknowledged. `Err` means
    /// the dedup store failed; the item should stay unacknowledged so it is
    /// redelivered.
    #[instrument(skip(self, item), fields(title = %item.title, depth = item.depth))]
    pub async fn process_one(&self, item: &WorkItem) -> Result<Outcome> {
        let title_key = DedupKey::title(&item.title);

        let result = match self.dedup.try_claim(&title_key).await {
            Ok(Some(token)) => {
                let _renewal = self.keep_claim(&title_key, &token);
                let title = Held { key: &title_key, token: &token };
                let result = self.process_claimed(item, &title).await;
                if result.is_err() {
                    self.release_quietly(&title).await;
                }
                result
            }
            Ok(None) => {
                debug!("Title already claimed");
                Ok(Outcome::Duplicate)
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(outcome) => {
                self.stats.record(outcome);
                metrics::record_item_finished(outcome.label());
            }
            Err(e) => {
                warn!(error = %e, "Dedup store failed, leaving item for redelivery");
                self.stats.record_error();
                metrics::record_item_finished("error");
            }
        }
        result
    }

    /// Renew a claim until the returned guard drops
    fn keep_claim(&self, key: &DedupKey, token: &ClaimToken) -> Heartbeat {
        let dedup = self.dedup.clone();
        let key = key.clone();
        let token = token.clone();

        Heartbeat::start(heartbeat::period_for(self.settings.claim_lease), move || {
            let dedup = dedup.clone();
            let key = key.clone();
            let token = token.clone();
            async move {
                match dedup.renew(&key, &token).await {
                    Ok(true) => true,
                    Ok(false) => {
                        debug!(key = %key, "Claim no longer held, renewal stopped");
                        false
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Claim renewal failed");
                        true
                    }
                }
            }
        })
    }

    async fn release_quietly(&self, held: &Held<'_>) {
        if let Err(e) = self.dedup.release(held.key, held.token).await {
            debug!(key = %held.key, error = %e, "Could not release claim");
        }
    }

    async fn process_claimed(&self, item: &WorkItem, title: &Held<'_>) -> Result<Outcome> {
        if self.settings.max_depth.is_some_and(|max| item.depth > max) {
            debug!("Beyond max depth, not fetching");
            self.dedup.mark_done(title.key).await?;
            return Ok(Outcome::DepthSkipped);
        }

        let fetched = {
            let _permit = self.fetch_gate.acquire().await.map_err(|_| AppError::Internal {
                message: "fetch gate closed".to_string(),
            })?;
            self.source.fetch(&item.title).await
        };

        let record = match fetched {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Fetch failed");
                self.settle_failed_title(item, title).await?;
                return Ok(Outcome::FetchFailed(e));
            }
        };

        let doi_key = DedupKey::external(&record.external_id);
        let Some(doi_token) = self.dedup.try_claim(&doi_key).await? else {
            debug!(external_id = %record.external_id, "Paper already handled");
            self.dedup.mark_done(title.key).await?;
            return Ok(Outcome::Duplicate);
        };

        let _renewal = self.keep_claim(&doi_key, &doi_token);
        let doi = Held { key: &doi_key, token: &doi_token };
        let result = self.process_record(item, title, &doi, &record).await;
        if result.is_err() {
            self.release_quietly(&doi).await;
        }
        result
    }

    async fn process_record(
        &self,
        item: &WorkItem,
        title: &Held<'_>,
        doi: &Held<'_>,
        record: &FetchedRecord,
    ) -> Result<Outcome> {
        if let Some(scope) = &self.scope {
            if !scope.is_in_scope(&record.title, &record.abstract_text, &record.subjects) {
                info!(external_id = %record.external_id, "Out of scope");
                self.dedup.mark_done(doi.key).await?;
                self.dedup.mark_done(title.key).await?;
                return Ok(Outcome::OutOfScope);
            }
        }

        let created = match self.persist(record).await {
            Ok(created) => created,
            Err(e) => {
                warn!(external_id = %record.external_id, error = %e, "Persist failed");
                self.dedup.release(doi.key, doi.token).await?;
                self.settle_failed_title(item, title).await?;
                return Ok(Outcome::PersistFailed(e.to_string()));
            }
        };

        let children = if self.settings.max_depth.map_or(true, |max| item.depth < max) {
            expand(record)
        } else {
            Vec::new()
        };
        let published = self.publish_children(item, children).await?;

        self.dedup.mark_done(doi.key).await?;
        self.dedup.mark_done(title.key).await?;

        info!(
            external_id = %record.external_id,
            created,
            published,
            "Item completed"
        );
        Ok(Outcome::Completed { created, published })
    }

    /// Store the paper, its authors and keywords. Returns whether the paper
    /// row is new.
    async fn persist(&self, record: &FetchedRecord) -> Result<bool> {
        let (paper, created) = self.gateway.upsert_paper(&record.to_paper()).await?;

        for author in &record.authors {
            let row = self.gateway.upsert_author(author).await?;
            self.gateway.link_author(&paper.external_id, row.id).await?;
        }

        for keyword in self.keywords.extract(&record.abstract_text) {
            let row = self.gateway.upsert_keyword(&keyword).await?;
            self.gateway.link_keyword(&paper.external_id, row.id).await?;
        }

        if created {
            metrics::record_paper_created();
        }
        Ok(created)
    }

    async fn publish_children(&self, item: &WorkItem, children: Vec<String>) -> Result<u32> {
        let mut published = 0;

        for child in children {
            let seen_key = DedupKey::seen(&child);
            let Some(token) = self.dedup.try_claim(&seen_key).await? else {
                continue;
            };

            tokio::time::sleep(self.settings.politeness).await;

            match self.producer.publish(&self.settings.topic, &item.child(child.as_str())).await {
                Ok(()) => {
                    self.dedup.mark_done(&seen_key).await?;
                    self.stats.record_publish(true);
                    published += 1;
                }
                Err(e) => {
                    warn!(child = %child, error = %e, "Reference not published");
                    self.dedup.release(&seen_key, &token).await?;
                    self.stats.record_publish(false);
                }
            }
        }
        Ok(published)
    }

    /// Under `Release` the title and its discovery gate both reopen, so the
    /// next run that meets the title again enqueues and fetches it.
    async fn settle_failed_title(&self, item: &WorkItem, title: &Held<'_>) -> Result<()> {
        match self.settings.failure_policy {
            FailurePolicy::Release => {
                self.dedup.release(title.key, title.token).await?;
                self.dedup.reopen_discovery(&item.title).await
            }
            FailurePolicy::MarkFailed => self.dedup.mark_failed(title.key, title.token).await,
        }
    }
}

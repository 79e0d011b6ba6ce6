//! Seed dispatch: puts depth-0 work items on the queue

use citecrawl_common::dedup::{normalize_title, DedupKey, DedupStore};
use citecrawl_common::{Producer, Result, WorkItem};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

/// Counts from one seed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub queued: u64,
    /// Already crawled, or repeated within the seed list
    pub skipped: u64,
    /// Publishes that exhausted their retries
    pub failed: u64,
}

/// Publish every seed title not yet crawled.
///
/// A dedup store error aborts the run; a failed publish is counted and the
/// run continues.
#[instrument(skip_all, fields(seeds = titles.len(), topic = %topic))]
pub async fn dispatch_seeds(
    titles: &[String],
    dedup: &dyn DedupStore,
    producer: &Producer,
    topic: &str,
) -> Result<DispatchReport> {
    let mut report = DispatchReport::default();
    let mut seen = HashSet::new();

    for title in titles {
        if !seen.insert(normalize_title(title)) {
            report.skipped += 1;
            continue;
        }

        if dedup.is_done(&DedupKey::title(title)).await? {
            info!(title = %title, "Seed already crawled, skipping");
            report.skipped += 1;
            continue;
        }

        match producer.publish(topic, &WorkItem::new(title.as_str(), 0)).await {
            Ok(()) => report.queued += 1,
            Err(e) => {
                warn!(title = %title, error = %e, "Seed not queued");
                report.failed += 1;
            }
        }
    }

    info!(
        queued = report.queued,
        skipped = report.skipped,
        failed = report.failed,
        "Seed dispatch finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use citecrawl_common::dedup::MemoryDedupStore;
    use citecrawl_common::queue::{MemoryQueue, PublishPolicy};
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn titles(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_seeds_queued_at_depth_zero() {
        let queue = Arc::new(MemoryQueue::new("crawl"));
        let producer = Producer::new(queue.clone(), PublishPolicy::default());
        let dedup = MemoryDedupStore::default();

        let report = assert_ok!(
            dispatch_seeds(
                &titles(&["graph neural networks", "node2vec"]),
                &dedup,
                &producer,
                "crawl",
            )
            .await
        );

        assert_eq!(report, DispatchReport { queued: 2, skipped: 0, failed: 0 });
        let items = queue.pending_items();
        assert_eq!(items, vec![WorkItem::new("graph neural networks", 0), WorkItem::new("node2vec", 0)]);
    }

    #[tokio::test]
    async fn test_crawled_and_repeated_titles_skipped() {
        let queue = Arc::new(MemoryQueue::new("crawl"));
        let producer = Producer::new(queue.clone(), PublishPolicy::default());
        let dedup = MemoryDedupStore::default();
        dedup.mark_done(&DedupKey::title("node2vec")).await.unwrap();

        let report = dispatch_seeds(
            &titles(&["Node2Vec", "deepwalk", "  DeepWalk "]),
            &dedup,
            &producer,
            "crawl",
        )
        .await
        .unwrap();

        assert_eq!(report.queued, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(queue.pending_items()[0].title, "deepwalk");
    }

    #[tokio::test]
    async fn test_closed_queue_counts_failures() {
        let queue = Arc::new(MemoryQueue::new("crawl"));
        let producer = Producer::new(queue.clone(), PublishPolicy::default());
        producer.close().await.unwrap();

        let report = dispatch_seeds(&titles(&["a", "b"]), &MemoryDedupStore::default(), &producer, "crawl")
            .await
            .unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(report.queued, 0);
    }
}

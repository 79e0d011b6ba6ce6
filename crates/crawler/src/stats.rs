//! Run counters and the end-of-run summary

use crate::worker::Outcome;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every task of one pool
#[derive(Debug, Default)]
pub struct CrawlStats {
    received: AtomicU64,
    completed: AtomicU64,
    papers_created: AtomicU64,
    duplicates: AtomicU64,
    depth_skipped: AtomicU64,
    out_of_scope: AtomicU64,
    fetch_failed: AtomicU64,
    persist_failed: AtomicU64,
    errored: AtomicU64,
    malformed: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
}

/// Snapshot printed when a run ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub received: u64,
    pub completed: u64,
    pub papers_created: u64,
    pub duplicates: u64,
    pub depth_skipped: u64,
    pub out_of_scope: u64,
    pub fetch_failed: u64,
    pub persist_failed: u64,
    /// Items left unacknowledged after a ledger error
    pub errored: u64,
    pub malformed: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub fetch_retries: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        bump(&self.received);
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed);
    }

    pub fn record_error(&self) {
        bump(&self.errored);
    }

    pub fn record_publish(&self, success: bool) {
        if success {
            bump(&self.published);
        } else {
            bump(&self.publish_failures);
        }
    }

    pub fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed { created, .. } => {
                bump(&self.completed);
                if *created {
                    bump(&self.papers_created);
                }
            }
            Outcome::Duplicate => bump(&self.duplicates),
            Outcome::DepthSkipped => bump(&self.depth_skipped),
            Outcome::OutOfScope => bump(&self.out_of_scope),
            Outcome::FetchFailed(_) => bump(&self.fetch_failed),
            Outcome::PersistFailed(_) => bump(&self.persist_failed),
        }
    }

    pub fn summary(&self, fetch_retries: u64) -> CrawlSummary {
        CrawlSummary {
            received: read(&self.received),
            completed: read(&self.completed),
            papers_created: read(&self.papers_created),
            duplicates: read(&self.duplicates),
            depth_skipped: read(&self.depth_skipped),
            out_of_scope: read(&self.out_of_scope),
            fetch_failed: read(&self.fetch_failed),
            persist_failed: read(&self.persist_failed),
            errored: read(&self.errored),
            malformed: read(&self.malformed),
            published: read(&self.published),
            publish_failures: read(&self.publish_failures),
            fetch_retries,
        }
    }
}

impl CrawlSummary {
    /// Whether any item or publish was lost or left for redelivery
    pub fn has_failures(&self) -> bool {
        self.fetch_failed + self.persist_failed + self.errored + self.publish_failures > 0
    }
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "received:         {}", self.received)?;
        writeln!(f, "completed:        {} ({} new papers)", self.completed, self.papers_created)?;
        writeln!(f, "duplicates:       {}", self.duplicates)?;
        writeln!(f, "depth skipped:    {}", self.depth_skipped)?;
        writeln!(f, "out of scope:     {}", self.out_of_scope)?;
        writeln!(f, "fetch failed:     {}", self.fetch_failed)?;
        writeln!(f, "persist failed:   {}", self.persist_failed)?;
        writeln!(f, "errored:          {}", self.errored)?;
        writeln!(f, "malformed:        {}", self.malformed)?;
        writeln!(f, "published:        {}", self.published)?;
        writeln!(f, "publish failures: {}", self.publish_failures)?;
        write!(f, "fetch retries:    {}", self.fetch_retries)
    }
}

//! citecrawl crawler
//!
//! Recursive citation-graph ingestion:
//! 1. Seed titles are published to the work queue at depth 0
//! 2. Workers fetch each title's metadata from Crossref
//! 3. Papers, authors and keywords are persisted idempotently
//! 4. Referenced titles are published at depth + 1 until the depth bound

pub mod cli;
pub mod dispatch;
pub mod errors;
pub mod expand;
pub mod fetch;
pub mod heartbeat;
pub mod keywords;
pub mod pool;
pub mod scope;
pub mod seeds;
pub mod stats;
pub mod worker;

pub use errors::{CrawlError, Result};
pub use pool::{PoolSettings, WorkerPool};
pub use stats::{CrawlStats, CrawlSummary};
pub use worker::{Outcome, Worker, WorkerSettings};

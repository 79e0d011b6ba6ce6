//! citecrawl Common Library
//!
//! Shared code for the citecrawl services:
//! - Configuration management
//! - Error types and handling
//! - Work queue (SQS) with a backoff producer
//! - Dedup ledger (Postgres, Redis, in-memory)
//! - Persistence gateway and database models
//! - Metrics

pub mod config;
pub mod db;
pub mod dedup;
pub mod errors;
pub mod metrics;
pub mod persistence;
pub mod queue;

// Re-export commonly used types
pub use config::AppConfig;
pub use dedup::{DedupKey, DedupStore};
pub use errors::{AppError, Result};
pub use persistence::PersistenceGateway;
pub use queue::{Producer, WorkItem, WorkQueue};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default Crossref works endpoint
pub const DEFAULT_API_BASE: &str = "https://api.crossref.org/works";

/// Default OpenAlex works endpoint
pub const DEFAULT_OPENALEX_BASE: &str = "https://api.openalex.org/works";

//! Persistence gateway
//!
//! Idempotent writes of papers, authors, keywords and their links. Every
//! write ignores conflicts: the first stored row wins and later writers get
//! it back unchanged.

mod memory;

pub use memory::MemoryGateway;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A paper keyed by its external identifier (DOI)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub external_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub abstract_text: String,
    pub citation_count: i64,
    pub link: Option<String>,
    pub kind: Option<String>,
}

/// Author as reported by the source, before it has an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuthor {
    pub name: String,
    pub external_author_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: Uuid,
    pub name: String,
    pub external_author_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: Uuid,
    pub keyword: String,
}

/// Idempotent store for crawl results
///
/// Authors are matched on exact, case-sensitive name. Keywords are matched
/// on exact text.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Insert-or-ignore. Returns the stored row and whether this call
    /// created it.
    async fn upsert_paper(&self, paper: &Paper) -> Result<(Paper, bool)>;

    async fn upsert_author(&self, author: &NewAuthor) -> Result<Author>;

    async fn upsert_keyword(&self, keyword: &str) -> Result<Keyword>;

    async fn link_author(&self, paper_id: &str, author_id: Uuid) -> Result<()>;

    async fn link_keyword(&self, paper_id: &str, keyword_id: Uuid) -> Result<()>;
}

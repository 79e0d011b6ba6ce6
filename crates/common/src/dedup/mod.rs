//! Dedup ledger
//!
//! Durable record of which titles and external identifiers are in flight or
//! finished. Three key spaces share one store:
//! - `title:<normalized>` is the processing claim held by a worker
//! - `seen:<normalized>` is the discovery gate checked before enqueueing
//! - `doi:<lowercased id>` is the post-fetch authority on a paper
//!
//! Status moves `pending -> done` or `pending -> failed`. `done` is terminal
//! for `title:` and `doi:` keys. A `seen:` gate may be reopened when its title
//! failed and was released, so a later discovery can publish it again.
//!
//! A pending claim belongs to the `ClaimToken` returned by `try_claim`. Only
//! that token renews, releases or fails it, so a worker whose claim was taken
//! over cannot disturb the new owner.

mod memory;
mod redis_store;

pub use memory::MemoryDedupStore;
pub use redis_store::RedisDedupStore;

use crate::errors::Result;
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// Case-fold and collapse whitespace
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A namespaced dedup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Processing claim for a title
    Title(String),
    /// Enqueue gate for a discovered title
    Seen(String),
    /// External identifier (DOI) of a fetched paper
    External(String),
}

impl DedupKey {
    pub fn title(title: &str) -> Self {
        Self::Title(normalize_title(title))
    }

    pub fn seen(title: &str) -> Self {
        Self::Seen(normalize_title(title))
    }

    pub fn external(id: &str) -> Self {
        Self::External(id.trim().to_lowercase())
    }

    /// Normalized value without the namespace
    pub fn value(&self) -> &str {
        match self {
            Self::Title(v) | Self::Seen(v) | Self::External(v) => v,
        }
    }

    fn namespace(&self) -> &'static str {
        match self {
            Self::Title(_) => "title",
            Self::Seen(_) => "seen",
            Self::External(_) => "doi",
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace(), self.value())
    }
}

/// Claim status of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    Pending,
    Done,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Proof of ownership of a pending claim
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimToken(String);

impl ClaimToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Shared, atomic claim ledger
///
/// Every operation is a single atomic step against the backend; callers on
/// different processes coordinate only through it.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Claim a key. Returns the owner token iff the key was free, or its
    /// pending claim outlived the lease.
    async fn try_claim(&self, key: &DedupKey) -> Result<Option<ClaimToken>>;

    /// Restart the lease of a claim still held by `token`. False once the
    /// claim is settled, released or taken over.
    async fn renew(&self, key: &DedupKey, token: &ClaimToken) -> Result<bool>;

    /// Mark a key done. Idempotent and never reverted.
    async fn mark_done(&self, key: &DedupKey) -> Result<()>;

    async fn is_done(&self, key: &DedupKey) -> Result<bool>;

    /// Drop a pending claim held by `token` so the key can be claimed again.
    /// No-op on done or failed keys and on claims owned by someone else.
    async fn release(&self, key: &DedupKey, token: &ClaimToken) -> Result<()>;

    /// Park a pending key held by `token` as failed; failed keys are not
    /// claimable.
    async fn mark_failed(&self, key: &DedupKey, token: &ClaimToken) -> Result<()>;

    /// Delete the `seen:` gate of a title, whatever its status
    async fn reopen_discovery(&self, title: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Graph   Neural\tNetworks "), "graph neural networks");
        assert_eq!(normalize_title(""), "");
    }

    #[test]
    fn test_key_namespaces() {
        assert_eq!(DedupKey::title("Node2Vec").to_string(), "title:node2vec");
        assert_eq!(DedupKey::seen("Node2Vec").to_string(), "seen:node2vec");
        assert_eq!(DedupKey::external(" 10.1/ABC ").to_string(), "doi:10.1/abc");
    }

    #[test]
    fn test_spelling_variants_share_a_key() {
        assert_eq!(
            DedupKey::title("Attention Is  All You Need"),
            DedupKey::title("attention is all you need")
        );
        assert_ne!(DedupKey::title("node2vec"), DedupKey::seen("node2vec"));
    }

    #[test]
    fn test_claim_tokens_are_unique() {
        assert_ne!(ClaimToken::generate(), ClaimToken::generate());
    }

    #[test]
    fn test_status_parse() {
        for status in [ClaimStatus::Pending, ClaimStatus::Done, ClaimStatus::Failed] {
            assert_eq!(ClaimStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ClaimStatus::parse("bogus"), None);
    }
}

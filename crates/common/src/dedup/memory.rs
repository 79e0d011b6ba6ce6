//! In-process dedup store

use super::{ClaimStatus, ClaimToken, DedupKey, DedupStore};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    status: ClaimStatus,
    claimed_at: Instant,
    owner: Option<ClaimToken>,
}

impl Entry {
    fn held_by(&self, token: &ClaimToken) -> bool {
        self.status == ClaimStatus::Pending && self.owner.as_ref() == Some(token)
    }
}

/// Dedup store held in memory, for tests and single-process runs
pub struct MemoryDedupStore {
    entries: Mutex<HashMap<DedupKey, Entry>>,
    lease: Duration,
}

impl MemoryDedupStore {
    pub fn new(lease: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lease,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<DedupKey, Entry>>> {
        self.entries.lock().map_err(|_| AppError::DedupStore {
            message: "memory dedup lock poisoned".to_string(),
        })
    }

    /// Current status of a key, if it has one
    pub fn status(&self, key: &DedupKey) -> Option<ClaimStatus> {
        self.lock().ok()?.get(key).map(|e| e.status)
    }

    /// Number of keys in the given status
    pub fn count(&self, status: ClaimStatus) -> usize {
        self.lock()
            .map(|m| m.values().filter(|e| e.status == status).count())
            .unwrap_or(0)
    }
}

impl Default for MemoryDedupStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn try_claim(&self, key: &DedupKey) -> Result<Option<ClaimToken>> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        let claimable = match entries.get(key) {
            None => true,
            Some(e) => {
                e.status == ClaimStatus::Pending && now.duration_since(e.claimed_at) >= self.lease
            }
        };
        if !claimable {
            return Ok(None);
        }

        let token = ClaimToken::generate();
        entries.insert(
            key.clone(),
            Entry {
                status: ClaimStatus::Pending,
                claimed_at: now,
                owner: Some(token.clone()),
            },
        );
        Ok(Some(token))
    }

    async fn renew(&self, key: &DedupKey, token: &ClaimToken) -> Result<bool> {
        let mut entries = self.lock()?;
        match entries.get_mut(key) {
            Some(e) if e.held_by(token) => {
                e.claimed_at = Instant::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_done(&self, key: &DedupKey) -> Result<()> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        entries
            .entry(key.clone())
            .and_modify(|e| {
                e.status = ClaimStatus::Done;
                e.owner = None;
            })
            .or_insert(Entry {
                status: ClaimStatus::Done,
                claimed_at: now,
                owner: None,
            });
        Ok(())
    }

    async fn is_done(&self, key: &DedupKey) -> Result<bool> {
        Ok(self
            .lock()?
            .get(key)
            .is_some_and(|e| e.status == ClaimStatus::Done))
    }

    async fn release(&self, key: &DedupKey, token: &ClaimToken) -> Result<()> {
        let mut entries = self.lock()?;
        if entries.get(key).is_some_and(|e| e.held_by(token)) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn mark_failed(&self, key: &DedupKey, token: &ClaimToken) -> Result<()> {
        let mut entries = self.lock()?;
        if let Some(e) = entries.get_mut(key) {
            if e.held_by(token) {
                e.status = ClaimStatus::Failed;
                e.owner = None;
            }
        }
        Ok(())
    }

    async fn reopen_discovery(&self, title: &str) -> Result<()> {
        self.lock()?.remove(&DedupKey::seen(title));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryDedupStore::default();
        let key = DedupKey::title("node2vec");

        assert!(store.try_claim(&key).await.unwrap().is_some());
        assert!(store.try_claim(&key).await.unwrap().is_none());
        assert!(store.try_claim(&DedupKey::title("  NODE2VEC ")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryDedupStore::default());
        let key = DedupKey::external("10.1/abc");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move { store.try_claim(&key).await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_done_is_monotonic() {
        let store = MemoryDedupStore::default();
        let key = DedupKey::title("a");

        let token = store.try_claim(&key).await.unwrap().unwrap();
        store.mark_done(&key).await.unwrap();
        store.mark_done(&key).await.unwrap();
        store.release(&key, &token).await.unwrap();
        store.mark_failed(&key, &token).await.unwrap();

        assert!(store.is_done(&key).await.unwrap());
        assert!(!store.renew(&key, &token).await.unwrap());
        assert!(store.try_claim(&key).await.unwrap().is_none());
        assert_eq!(store.status(&key), Some(ClaimStatus::Done));
    }

    #[tokio::test]
    async fn test_release_frees_pending_claim() {
        let store = MemoryDedupStore::default();
        let key = DedupKey::seen("b");

        let token = store.try_claim(&key).await.unwrap().unwrap();
        store.release(&key, &token).await.unwrap();
        assert!(store.try_claim(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_key_is_not_reclaimed() {
        let store = MemoryDedupStore::new(Duration::from_secs(1));
        let key = DedupKey::title("c");

        let token = store.try_claim(&key).await.unwrap().unwrap();
        store.mark_failed(&key, &token).await.unwrap();
        assert!(store.try_claim(&key).await.unwrap().is_none());
        assert!(!store.is_done(&key).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_claim_is_taken_over_after_lease() {
        let store = MemoryDedupStore::new(Duration::from_secs(60));
        let key = DedupKey::title("d");

        assert!(store.try_claim(&key).await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.try_claim(&key).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.try_claim(&key).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewed_claim_outlives_lease() {
        let store = MemoryDedupStore::new(Duration::from_secs(60));
        let key = DedupKey::title("e");

        let token = store.try_claim(&key).await.unwrap().unwrap();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(40)).await;
            assert!(store.renew(&key, &token).await.unwrap());
        }
        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(store.try_claim(&key).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_previous_owner_cannot_touch_taken_over_claim() {
        let store = MemoryDedupStore::new(Duration::from_secs(60));
        let key = DedupKey::title("f");

        let stale = store.try_claim(&key).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        let current = store.try_claim(&key).await.unwrap().unwrap();

        assert!(!store.renew(&key, &stale).await.unwrap());
        store.release(&key, &stale).await.unwrap();
        store.mark_failed(&key, &stale).await.unwrap();
        assert_eq!(store.status(&key), Some(ClaimStatus::Pending));

        assert!(store.renew(&key, &current).await.unwrap());
        store.release(&key, &current).await.unwrap();
        assert_eq!(store.status(&key), None);
    }

    #[tokio::test]
    async fn test_reopen_discovery_clears_done_gate() {
        let store = MemoryDedupStore::default();
        let gate = DedupKey::seen("Lost Paper");

        store.try_claim(&gate).await.unwrap().unwrap();
        store.mark_done(&gate).await.unwrap();
        store.reopen_discovery("lost  paper").await.unwrap();

        assert_eq!(store.status(&gate), None);
        assert!(store.try_claim(&gate).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mark_done_without_claim() {
        let store = MemoryDedupStore::default();
        let key = DedupKey::external("10.9/xyz");
        store.mark_done(&key).await.unwrap();
        assert!(store.is_done(&key).await.unwrap());
        assert_eq!(store.count(ClaimStatus::Done), 1);
    }
}

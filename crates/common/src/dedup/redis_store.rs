//! Redis-backed dedup store
//!
//! Pending claims are `SET NX PX <lease>` with the value `pending:<token>`,
//! so an abandoned claim expires on its own and only its owner matches it.
//! Done and failed marks carry no expiry.

use super::{ClaimStatus, ClaimToken, DedupKey, DedupStore};
use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};

/// Push the expiry out while the owner still holds the claim
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Drop the key only while the owner still holds the claim
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Move the owner's pending claim to failed, leave anything else alone
const FAIL_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Redis dedup client
pub struct RedisDedupStore {
    connection: ConnectionManager,
    key_prefix: String,
    lease: Duration,
    renew: Script,
    release: Script,
    fail: Script,
}

impl RedisDedupStore {
    /// Connect and verify the server answers
    pub async fn new(config: &RedisConfig, lease: Duration) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::DedupStore {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::DedupStore {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        let store = Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            lease,
            renew: Script::new(RENEW_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            fail: Script::new(FAIL_SCRIPT),
        };
        store.ping().await?;
        info!(url = %config.url, "Connected to Redis dedup store");

        Ok(store)
    }

    /// Build a prefixed, fixed-length key
    fn key(&self, key: &DedupKey) -> String {
        storage_key(&self.key_prefix, key)
    }

    fn lease_millis(&self) -> u64 {
        self.lease.as_millis().max(1) as u64
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::DedupStore {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Titles are unbounded text; hash them so key length stays fixed
fn storage_key(prefix: &str, key: &DedupKey) -> String {
    let digest = hex::encode(Sha256::digest(key.to_string().as_bytes()));
    format!("{}:dedup:{}", prefix, digest)
}

/// Stored value of a pending claim
fn pending_value(token: &ClaimToken) -> String {
    format!("{}:{}", ClaimStatus::Pending.as_str(), token.as_str())
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn try_claim(&self, key: &DedupKey) -> Result<Option<ClaimToken>> {
        let token = ClaimToken::generate();
        let mut conn = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(pending_value(&token))
            .arg("NX")
            .arg("PX")
            .arg(self.lease_millis())
            .query_async(&mut conn)
            .await?;

        let claimed = reply.is_some();
        debug!(key = %key, claimed, "Dedup claim");
        Ok(claimed.then_some(token))
    }

    async fn renew(&self, key: &DedupKey, token: &ClaimToken) -> Result<bool> {
        let mut conn = self.connection.clone();
        let renewed: i64 = self
            .renew
            .key(self.key(key))
            .arg(pending_value(token))
            .arg(self.lease_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed > 0)
    }

    async fn mark_done(&self, key: &DedupKey) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(self.key(key), ClaimStatus::Done.as_str())
            .await?;
        debug!(key = %key, "Dedup done");
        Ok(())
    }

    async fn is_done(&self, key: &DedupKey) -> Result<bool> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value.as_deref() == Some(ClaimStatus::Done.as_str()))
    }

    async fn release(&self, key: &DedupKey, token: &ClaimToken) -> Result<()> {
        let mut conn = self.connection.clone();
        let released: i64 = self
            .release
            .key(self.key(key))
            .arg(pending_value(token))
            .invoke_async(&mut conn)
            .await?;
        debug!(key = %key, released = released > 0, "Dedup release");
        Ok(())
    }

    async fn mark_failed(&self, key: &DedupKey, token: &ClaimToken) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = self
            .fail
            .key(self.key(key))
            .arg(pending_value(token))
            .arg(ClaimStatus::Failed.as_str())
            .invoke_async(&mut conn)
            .await?;
        debug!(key = %key, "Dedup failed");
        Ok(())
    }

    async fn reopen_discovery(&self, title: &str) -> Result<()> {
        let key = DedupKey::seen(title);
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(&key)).await?;
        debug!(key = %key, "Discovery gate reopened");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_is_hashed_and_prefixed() {
        let key = storage_key("citecrawl", &DedupKey::title("Graph Neural Networks"));
        assert!(key.starts_with("citecrawl:dedup:"));
        assert_eq!(key.len(), "citecrawl:dedup:".len() + 64);
    }

    #[test]
    fn test_namespaces_hash_apart() {
        let title = storage_key("p", &DedupKey::title("node2vec"));
        let seen = storage_key("p", &DedupKey::seen("node2vec"));
        assert_ne!(title, seen);
        assert_eq!(title, storage_key("p", &DedupKey::title("NODE2VEC")));
    }

    #[test]
    fn test_pending_value_names_its_owner() {
        let a = ClaimToken::generate();
        let b = ClaimToken::generate();
        assert_eq!(pending_value(&a), format!("pending:{}", a.as_str()));
        assert_ne!(pending_value(&a), pending_value(&b));
        assert_ne!(pending_value(&a), ClaimStatus::Done.as_str());
    }
}

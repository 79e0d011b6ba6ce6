//! Postgres-backed dedup ledger
//!
//! Each operation is one conditional statement, so concurrent workers on
//! different hosts agree on who holds a key.

use crate::db::models::{LedgerColumn, LedgerEntity};
use crate::db::DbPool;
use crate::dedup::{ClaimStatus, ClaimToken, DedupKey, DedupStore};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, DbErr, EntityTrait, QuerySelect, Statement, Value};
use std::time::Duration;
use tracing::debug;

/// Insert a pending claim, or take over one whose lease ran out
const CLAIM_SQL: &str = r#"
INSERT INTO crawl_ledger (key, status, owner, claimed_at, updated_at)
VALUES ($1, 'pending', $2, NOW(), NOW())
ON CONFLICT (key) DO UPDATE
    SET owner = EXCLUDED.owner, claimed_at = NOW(), updated_at = NOW()
    WHERE crawl_ledger.status = 'pending'
      AND crawl_ledger.claimed_at < NOW() - make_interval(secs => $3)
"#;

const RENEW_SQL: &str = r#"
UPDATE crawl_ledger SET claimed_at = NOW(), updated_at = NOW()
WHERE key = $1 AND status = 'pending' AND owner = $2
"#;

const DONE_SQL: &str = r#"
INSERT INTO crawl_ledger (key, status, claimed_at, updated_at)
VALUES ($1, 'done', NOW(), NOW())
ON CONFLICT (key) DO UPDATE
    SET status = 'done', owner = NULL, updated_at = NOW()
    WHERE crawl_ledger.status <> 'done'
"#;

const RELEASE_SQL: &str =
    "DELETE FROM crawl_ledger WHERE key = $1 AND status = 'pending' AND owner = $2";

const FAIL_SQL: &str = r#"
UPDATE crawl_ledger SET status = 'failed', owner = NULL, updated_at = NOW()
WHERE key = $1 AND status = 'pending' AND owner = $2
"#;

const REOPEN_SQL: &str = "DELETE FROM crawl_ledger WHERE key = $1";

fn ledger_error(op: &str, key: &DedupKey, err: DbErr) -> AppError {
    AppError::DedupStore {
        message: format!("ledger {} failed for '{}': {}", op, key, err),
    }
}

/// Dedup ledger stored in the crawl database
#[derive(Clone)]
pub struct PgDedupStore {
    pool: DbPool,
    lease: Duration,
}

impl PgDedupStore {
    pub fn new(pool: DbPool, lease: Duration) -> Self {
        Self { pool, lease }
    }

    async fn execute(&self, op: &str, key: &DedupKey, sql: &str, extra: Vec<Value>) -> Result<u64> {
        let mut values: Vec<Value> = vec![key.to_string().into()];
        values.extend(extra);
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);

        let result = self
            .pool
            .conn()
            .execute(stmt)
            .await
            .map_err(|e| ledger_error(op, key, e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DedupStore for PgDedupStore {
    async fn try_claim(&self, key: &DedupKey) -> Result<Option<ClaimToken>> {
        let token = ClaimToken::generate();
        let affected = self
            .execute(
                "claim",
                key,
                CLAIM_SQL,
                vec![token.as_str().into(), self.lease.as_secs_f64().into()],
            )
            .await?;
        debug!(key = %key, claimed = affected > 0, "Ledger claim");
        Ok((affected > 0).then_some(token))
    }

    async fn renew(&self, key: &DedupKey, token: &ClaimToken) -> Result<bool> {
        let affected = self
            .execute("renew", key, RENEW_SQL, vec![token.as_str().into()])
            .await?;
        Ok(affected > 0)
    }

    async fn mark_done(&self, key: &DedupKey) -> Result<()> {
        self.execute("done", key, DONE_SQL, Vec::new()).await?;
        Ok(())
    }

    async fn is_done(&self, key: &DedupKey) -> Result<bool> {
        let status: Option<String> = LedgerEntity::find_by_id(key.to_string())
            .select_only()
            .column(LedgerColumn::Status)
            .into_tuple()
            .one(self.pool.conn())
            .await
            .map_err(|e| ledger_error("lookup", key, e))?;

        Ok(status.as_deref().and_then(ClaimStatus::parse) == Some(ClaimStatus::Done))
    }

    async fn release(&self, key: &DedupKey, token: &ClaimToken) -> Result<()> {
        self.execute("release", key, RELEASE_SQL, vec![token.as_str().into()])
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, key: &DedupKey, token: &ClaimToken) -> Result<()> {
        self.execute("fail", key, FAIL_SQL, vec![token.as_str().into()])
            .await?;
        Ok(())
    }

    async fn reopen_discovery(&self, title: &str) -> Result<()> {
        let key = DedupKey::seen(title);
        self.execute("reopen", &key, REOPEN_SQL, Vec::new()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseConnection, MockDatabase, MockExecResult, Transaction};
    use std::collections::BTreeMap;

    const LEASE: Duration = Duration::from_secs(600);

    fn affected(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    fn mock(results: Vec<MockExecResult>) -> (DatabaseConnection, PgDedupStore) {
        let conn = MockDatabase::new(DbBackend::Postgres)
            .append_exec_results(results)
            .into_connection();
        let store = PgDedupStore::new(DbPool::from_connection(conn.clone()), LEASE);
        (conn, store)
    }

    fn stmt(sql: &str, values: Vec<Value>) -> Transaction {
        Transaction::from_sql_and_values(DbBackend::Postgres, sql, values)
    }

    #[tokio::test]
    async fn test_claim_takes_over_only_when_row_is_written() {
        let (conn, store) = mock(vec![affected(1), affected(0)]);
        let key = DedupKey::title("Node2Vec");

        let won = store.try_claim(&key).await.unwrap();
        let lost = store.try_claim(&key).await.unwrap();

        let token = won.unwrap();
        assert!(lost.is_none());

        let log = conn.into_transaction_log();
        assert_eq!(log.len(), 2);
        assert_eq!(
            log[0],
            stmt(
                CLAIM_SQL,
                vec![
                    "title:node2vec".into(),
                    token.as_str().into(),
                    LEASE.as_secs_f64().into(),
                ]
            )
        );
    }

    #[tokio::test]
    async fn test_owner_scoped_statements_carry_the_token() {
        let (conn, store) = mock(vec![affected(1), affected(0), affected(1), affected(1)]);
        let key = DedupKey::external("10.1/ABC");
        let token = ClaimToken::generate();

        assert!(store.renew(&key, &token).await.unwrap());
        assert!(!store.renew(&key, &token).await.unwrap());
        store.release(&key, &token).await.unwrap();
        store.mark_failed(&key, &token).await.unwrap();

        let owned = |sql: &str| stmt(sql, vec!["doi:10.1/abc".into(), token.as_str().into()]);
        assert_eq!(
            conn.into_transaction_log(),
            vec![owned(RENEW_SQL), owned(RENEW_SQL), owned(RELEASE_SQL), owned(FAIL_SQL)]
        );
    }

    #[tokio::test]
    async fn test_done_is_unconditional_upsert() {
        let (conn, store) = mock(vec![affected(1), affected(0)]);
        let key = DedupKey::title("a");

        store.mark_done(&key).await.unwrap();
        store.mark_done(&key).await.unwrap();

        let done = stmt(DONE_SQL, vec!["title:a".into()]);
        assert_eq!(conn.into_transaction_log(), vec![done.clone(), done]);
        assert!(DONE_SQL.contains("WHERE crawl_ledger.status <> 'done'"));
    }

    #[tokio::test]
    async fn test_reopen_targets_the_seen_gate() {
        let (conn, store) = mock(vec![affected(1)]);

        store.reopen_discovery("  Lost   Paper ").await.unwrap();

        assert_eq!(
            conn.into_transaction_log(),
            vec![stmt(REOPEN_SQL, vec!["seen:lost paper".into()])]
        );
    }

    #[tokio::test]
    async fn test_is_done_reads_status() {
        let row = BTreeMap::from([("status", Value::from("done"))]);
        let conn = MockDatabase::new(DbBackend::Postgres)
            .append_query_results([vec![row], Vec::new()])
            .into_connection();
        let store = PgDedupStore::new(DbPool::from_connection(conn), LEASE);

        assert!(store.is_done(&DedupKey::title("a")).await.unwrap());
        assert!(!store.is_done(&DedupKey::title("b")).await.unwrap());
    }

    #[test]
    fn test_only_pending_rows_change_hands() {
        assert!(CLAIM_SQL.contains("WHERE crawl_ledger.status = 'pending'"));
        for sql in [RENEW_SQL, RELEASE_SQL, FAIL_SQL] {
            assert!(sql.contains("status = 'pending' AND owner = $2"));
        }
    }

    #[tokio::test]
    async fn test_ledger_errors_are_transient() {
        let conn = MockDatabase::new(DbBackend::Postgres)
            .append_exec_errors([DbErr::Custom("down".into())])
            .into_connection();
        let store = PgDedupStore::new(DbPool::from_connection(conn), LEASE);

        let err = store.try_claim(&DedupKey::title("x")).await.unwrap_err();
        assert!(err.is_transient());
    }
}

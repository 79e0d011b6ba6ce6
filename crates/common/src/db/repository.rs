//! Repository pattern for database operations
//!
//! All writes are insert-or-ignore; the stored row is read back afterwards.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::persistence::{Author, Keyword, NewAuthor, Paper, PersistenceGateway};
use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use tracing::debug;
use uuid::Uuid;

/// Rows written by an insert that may have hit a conflict
fn rows_inserted(result: std::result::Result<u64, DbErr>) -> Result<u64> {
    match result {
        Ok(n) => Ok(n),
        Err(DbErr::RecordNotInserted) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub async fn find_paper(&self, external_id: &str) -> Result<Option<Paper>> {
        Ok(PaperEntity::find_by_id(external_id.to_string())
            .one(self.conn())
            .await?
            .map(Into::into))
    }

    pub async fn find_author_by_name(&self, name: &str) -> Result<Option<Author>> {
        Ok(AuthorEntity::find()
            .filter(AuthorColumn::Name.eq(name))
            .one(self.conn())
            .await?
            .map(Into::into))
    }

    pub async fn find_keyword(&self, keyword: &str) -> Result<Option<Keyword>> {
        Ok(KeywordEntity::find()
            .filter(KeywordColumn::Keyword.eq(keyword))
            .one(self.conn())
            .await?
            .map(Into::into))
    }
}

fn missing_after_upsert(resource_type: &str, id: &str) -> AppError {
    AppError::Internal {
        message: format!("{} '{}' missing after upsert", resource_type, id),
    }
}

#[async_trait]
impl PersistenceGateway for Repository {
    async fn upsert_paper(&self, paper: &Paper) -> Result<(Paper, bool)> {
        let row = PaperActiveModel {
            external_id: Set(paper.external_id.clone()),
            title: Set(paper.title.clone()),
            year: Set(paper.year),
            abstract_text: Set(paper.abstract_text.clone()),
            citation_count: Set(paper.citation_count),
            link: Set(paper.link.clone()),
            kind: Set(paper.kind.clone()),
            created_at: Set(chrono::Utc::now().into()),
        };

        let inserted = rows_inserted(
            PaperEntity::insert(row)
                .on_conflict(OnConflict::column(PaperColumn::ExternalId).do_nothing().to_owned())
                .exec_without_returning(self.conn())
                .await,
        )?;

        let stored = self
            .find_paper(&paper.external_id)
            .await?
            .ok_or_else(|| missing_after_upsert("paper", &paper.external_id))?;

        debug!(external_id = %paper.external_id, created = inserted > 0, "Paper upserted");
        Ok((stored, inserted > 0))
    }

    async fn upsert_author(&self, author: &NewAuthor) -> Result<Author> {
        let row = AuthorActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(author.name.clone()),
            external_author_id: Set(author.external_author_id.clone()),
        };

        rows_inserted(
            AuthorEntity::insert(row)
                .on_conflict(OnConflict::column(AuthorColumn::Name).do_nothing().to_owned())
                .exec_without_returning(self.conn())
                .await,
        )?;

        self.find_author_by_name(&author.name)
            .await?
            .ok_or_else(|| missing_after_upsert("author", &author.name))
    }

    async fn upsert_keyword(&self, keyword: &str) -> Result<Keyword> {
        let row = KeywordActiveModel {
            id: Set(Uuid::new_v4()),
            keyword: Set(keyword.to_string()),
        };

        rows_inserted(
            KeywordEntity::insert(row)
                .on_conflict(OnConflict::column(KeywordColumn::Keyword).do_nothing().to_owned())
                .exec_without_returning(self.conn())
                .await,
        )?;

        self.find_keyword(keyword)
            .await?
            .ok_or_else(|| missing_after_upsert("keyword", keyword))
    }

    async fn link_author(&self, paper_id: &str, author_id: Uuid) -> Result<()> {
        let row = PaperAuthorActiveModel {
            paper_id: Set(paper_id.to_string()),
            author_id: Set(author_id),
        };

        rows_inserted(
            PaperAuthorEntity::insert(row)
                .on_conflict(
                    OnConflict::columns([PaperAuthorColumn::PaperId, PaperAuthorColumn::AuthorId])
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(self.conn())
                .await,
        )?;
        Ok(())
    }

    async fn link_keyword(&self, paper_id: &str, keyword_id: Uuid) -> Result<()> {
        let row = PaperKeywordActiveModel {
            paper_id: Set(paper_id.to_string()),
            keyword_id: Set(keyword_id),
        };

        rows_inserted(
            PaperKeywordEntity::insert(row)
                .on_conflict(
                    OnConflict::columns([PaperKeywordColumn::PaperId, PaperKeywordColumn::KeywordId])
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(self.conn())
                .await,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_counts_as_zero_rows() {
        assert_eq!(rows_inserted(Err(DbErr::RecordNotInserted)).unwrap(), 0);
        assert_eq!(rows_inserted(Ok(1)).unwrap(), 1);
        assert!(rows_inserted(Err(DbErr::Custom("boom".into()))).is_err());
    }
}

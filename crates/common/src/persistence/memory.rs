//! In-process persistence gateway

use super::{Author, Keyword, NewAuthor, Paper, PersistenceGateway};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    papers: HashMap<String, Paper>,
    authors: HashMap<String, Author>,
    keywords: HashMap<String, Keyword>,
    paper_authors: HashSet<(String, Uuid)>,
    paper_keywords: HashSet<(String, Uuid)>,
}

/// Gateway held in memory, with the same conflict rules as the database
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| AppError::Internal {
            message: "memory gateway lock poisoned".to_string(),
        })
    }

    pub fn paper_count(&self) -> usize {
        self.lock().map(|s| s.papers.len()).unwrap_or(0)
    }

    pub fn author_count(&self) -> usize {
        self.lock().map(|s| s.authors.len()).unwrap_or(0)
    }

    pub fn keyword_count(&self) -> usize {
        self.lock().map(|s| s.keywords.len()).unwrap_or(0)
    }

    pub fn paper(&self, external_id: &str) -> Option<Paper> {
        self.lock().ok()?.papers.get(external_id).cloned()
    }

    /// Author names linked to a paper, sorted
    pub fn authors_of(&self, paper_id: &str) -> Vec<String> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut names: Vec<String> = state
            .authors
            .values()
            .filter(|a| state.paper_authors.contains(&(paper_id.to_string(), a.id)))
            .map(|a| a.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Keywords linked to a paper, sorted
    pub fn keywords_of(&self, paper_id: &str) -> Vec<String> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut words: Vec<String> = state
            .keywords
            .values()
            .filter(|k| state.paper_keywords.contains(&(paper_id.to_string(), k.id)))
            .map(|k| k.keyword.clone())
            .collect();
        words.sort();
        words
    }

    pub fn author_link_count(&self) -> usize {
        self.lock().map(|s| s.paper_authors.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn upsert_paper(&self, paper: &Paper) -> Result<(Paper, bool)> {
        let mut state = self.lock()?;
        if let Some(existing) = state.papers.get(&paper.external_id) {
            return Ok((existing.clone(), false));
        }
        state.papers.insert(paper.external_id.clone(), paper.clone());
        Ok((paper.clone(), true))
    }

    async fn upsert_author(&self, author: &NewAuthor) -> Result<Author> {
        let mut state = self.lock()?;
        let row = state
            .authors
            .entry(author.name.clone())
            .or_insert_with(|| Author {
                id: Uuid::new_v4(),
                name: author.name.clone(),
                external_author_id: author.external_author_id.clone(),
            });
        Ok(row.clone())
    }

    async fn upsert_keyword(&self, keyword: &str) -> Result<Keyword> {
        let mut state = self.lock()?;
        let row = state
            .keywords
            .entry(keyword.to_string())
            .or_insert_with(|| Keyword {
                id: Uuid::new_v4(),
                keyword: keyword.to_string(),
            });
        Ok(row.clone())
    }

    async fn link_author(&self, paper_id: &str, author_id: Uuid) -> Result<()> {
        self.lock()?
            .paper_authors
            .insert((paper_id.to_string(), author_id));
        Ok(())
    }

    async fn link_keyword(&self, paper_id: &str, keyword_id: Uuid) -> Result<()> {
        self.lock()?
            .paper_keywords
            .insert((paper_id.to_string(), keyword_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(id: &str, title: &str) -> Paper {
        Paper {
            external_id: id.to_string(),
            title: title.to_string(),
            year: Some(2017),
            abstract_text: String::new(),
            citation_count: 0,
            link: None,
            kind: Some("journal-article".to_string()),
        }
    }

    #[tokio::test]
    async fn test_existing_paper_wins() {
        let gateway = MemoryGateway::new();

        let (_, created) = gateway.upsert_paper(&paper("10.1/abc", "First")).await.unwrap();
        assert!(created);

        let (row, created) = gateway.upsert_paper(&paper("10.1/abc", "Second")).await.unwrap();
        assert!(!created);
        assert_eq!(row.title, "First");
        assert_eq!(gateway.paper_count(), 1);
    }

    #[tokio::test]
    async fn test_author_dedup_is_exact_name() {
        let gateway = MemoryGateway::new();
        let a = gateway
            .upsert_author(&NewAuthor { name: "Ada Lovelace".into(), external_author_id: None })
            .await
            .unwrap();
        let b = gateway
            .upsert_author(&NewAuthor { name: "Ada Lovelace".into(), external_author_id: Some("0000-0001".into()) })
            .await
            .unwrap();
        let c = gateway
            .upsert_author(&NewAuthor { name: "ada lovelace".into(), external_author_id: None })
            .await
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(b.external_author_id, None);
        assert_ne!(a.id, c.id);
        assert_eq!(gateway.author_count(), 2);
    }

    #[tokio::test]
    async fn test_links_are_unique_per_pair() {
        let gateway = MemoryGateway::new();
        gateway.upsert_paper(&paper("10.1/abc", "T")).await.unwrap();
        let author = gateway
            .upsert_author(&NewAuthor { name: "A".into(), external_author_id: None })
            .await
            .unwrap();
        let keyword = gateway.upsert_keyword("graph learning").await.unwrap();

        for _ in 0..3 {
            gateway.link_author("10.1/abc", author.id).await.unwrap();
            gateway.link_keyword("10.1/abc", keyword.id).await.unwrap();
        }

        assert_eq!(gateway.author_link_count(), 1);
        assert_eq!(gateway.keywords_of("10.1/abc"), vec!["graph learning"]);
    }
}

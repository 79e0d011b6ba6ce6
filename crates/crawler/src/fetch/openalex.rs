//! OpenAlex `/works` transport
//!
//! A title search returns the top work with its references as OpenAlex ids.
//! A second request resolves up to `MAX_RESOLVED_REFERENCES` of those ids to
//! titles, so one attempt costs at most two requests. Either request failing
//! fails the attempt as a whole.

use super::http::{polite_client, request_budget, unsuccessful};
use super::record::{non_empty, orcid_id};
use super::{AttemptResult, FetchedRecord, Transport};
use crate::errors::Result;
use async_trait::async_trait;
use citecrawl_common::config::FetchConfig;
use citecrawl_common::persistence::NewAuthor;
use governor::DefaultDirectRateLimiter;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Upper bound of one `openalex:` OR-filter
const MAX_RESOLVED_REFERENCES: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct OpenAlexResults {
    #[serde(default)]
    pub results: Vec<OpenAlexWork>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenAlexWork {
    /// `https://openalex.org/W…`
    #[serde(default)]
    pub id: Option<String>,
    /// `https://doi.org/10.…`
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub publication_year: Option<i32>,
    /// Word to positions
    #[serde(default)]
    pub abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    #[serde(default)]
    pub authorships: Vec<Authorship>,
    #[serde(default)]
    pub cited_by_count: Option<i64>,
    #[serde(default)]
    pub primary_location: Option<Location>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub primary_topic: Option<Topic>,
    #[serde(default)]
    pub referenced_works: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Authorship {
    #[serde(default)]
    pub author: Option<AuthorRef>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorRef {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub orcid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub landing_page_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Topic {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub subfield: Option<Named>,
    #[serde(default)]
    pub field: Option<Named>,
    #[serde(default)]
    pub domain: Option<Named>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Named {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// `W123` from `https://openalex.org/W123`
fn short_id(id: &str) -> &str {
    let id = id.trim().trim_end_matches('/');
    id.rsplit('/').next().unwrap_or(id)
}

/// Bare DOI from its resolver URL
fn bare_doi(doi: &str) -> Option<String> {
    let doi = doi.trim();
    let bare = ["https://doi.org/", "http://doi.org/", "doi:"]
        .iter()
        .find_map(|prefix| doi.strip_prefix(prefix))
        .unwrap_or(doi);
    non_empty(Some(bare)).map(str::to_string)
}

/// Lay the words of an inverted index back out in position order
pub fn rebuild_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let mut placed: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str())))
        .collect();
    placed.sort_unstable_by_key(|(position, _)| *position);
    placed.into_iter().map(|(_, word)| word).collect::<Vec<_>>().join(" ")
}

impl OpenAlexWork {
    fn name(&self) -> Option<&str> {
        non_empty(self.display_name.as_deref()).or_else(|| non_empty(self.title.as_deref()))
    }

    /// Short ids of the referenced works, in list order, capped
    pub fn reference_ids(&self) -> Vec<String> {
        self.referenced_works
            .iter()
            .map(|id| short_id(id).to_string())
            .filter(|id| !id.is_empty())
            .take(MAX_RESOLVED_REFERENCES)
            .collect()
    }

    /// Primary topic, then its subfield, field and domain
    fn subjects(&self) -> Vec<String> {
        let Some(topic) = &self.primary_topic else {
            return Vec::new();
        };
        let parents = [&topic.subfield, &topic.field, &topic.domain]
            .into_iter()
            .flatten()
            .map(|n| n.display_name.as_deref());

        std::iter::once(topic.display_name.as_deref())
            .chain(parents)
            .filter_map(non_empty)
            .map(str::to_string)
            .collect()
    }

    /// Validate and map. Reference titles are resolved separately.
    pub fn into_record(self) -> std::result::Result<FetchedRecord, &'static str> {
        let title = self.name().map(str::to_string).ok_or("title")?;
        let external_id = self.doi.as_deref().and_then(bare_doi).ok_or("DOI")?;

        let authors = self
            .authorships
            .iter()
            .filter_map(|a| a.author.as_ref())
            .filter_map(|a| {
                Some(NewAuthor {
                    name: non_empty(a.display_name.as_deref())?.to_string(),
                    external_author_id: a.orcid.as_deref().and_then(orcid_id),
                })
            })
            .collect();

        let link = self
            .primary_location
            .as_ref()
            .and_then(|l| non_empty(l.landing_page_url.as_deref()))
            .map(str::to_string)
            .or_else(|| self.doi.as_deref().and_then(|d| non_empty(Some(d))).map(str::to_string));

        Ok(FetchedRecord {
            year: self.publication_year,
            abstract_text: self
                .abstract_inverted_index
                .as_ref()
                .map(rebuild_abstract)
                .unwrap_or_default(),
            authors,
            citation_count: self.cited_by_count.unwrap_or(0).max(0),
            link,
            kind: non_empty(self.kind.as_deref()).map(str::to_string),
            subjects: self.subjects(),
            referenced_titles: Vec::new(),
            external_id,
            title,
        })
    }
}

/// Titles of the resolved works, in the order their ids were listed
fn titles_in_order(ids: &[String], found: Vec<OpenAlexWork>) -> Vec<String> {
    let by_id: HashMap<String, String> = found
        .iter()
        .filter_map(|w| Some((short_id(w.id.as_deref()?).to_string(), w.name()?.to_string())))
        .collect();
    ids.iter().filter_map(|id| by_id.get(id).cloned()).collect()
}

/// OpenAlex works client
pub struct OpenAlexTransport {
    client: reqwest::Client,
    api_base: String,
    mailto: String,
    limiter: DefaultDirectRateLimiter,
}

impl OpenAlexTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: polite_client(config)?,
            api_base: config.openalex_api_base.clone(),
            mailto: config.mailto.clone(),
            limiter: request_budget(config),
        })
    }

    async fn get(&self, query: &[(&str, &str)]) -> std::result::Result<OpenAlexResults, AttemptResult> {
        self.limiter.until_ready().await;

        let response = self
            .client
            .get(&self.api_base)
            .query(query)
            .query(&[("mailto", self.mailto.as_str())])
            .send()
            .await
            .map_err(|e| AttemptResult::Failed(format!("Request failed: {}", e)))?;

        if let Some(result) = unsuccessful(&response) {
            return Err(result);
        }

        response
            .json()
            .await
            .map_err(|e| AttemptResult::Failed(format!("Failed to parse response: {}", e)))
    }

    async fn resolve_titles(&self, ids: &[String]) -> std::result::Result<Vec<String>, AttemptResult> {
        let filter = format!("openalex:{}", ids.join("|"));
        let per_page = ids.len().to_string();
        let query = [
            ("filter", filter.as_str()),
            ("select", "id,display_name"),
            ("per-page", per_page.as_str()),
        ];

        match self.get(&query).await {
            Ok(body) => Ok(titles_in_order(ids, body.results)),
            Err(AttemptResult::NotFound) => Ok(Vec::new()),
            Err(other) => Err(other),
        }
    }
}

#[async_trait]
impl Transport for OpenAlexTransport {
    async fn attempt(&self, title: &str) -> AttemptResult {
        let body = match self.get(&[("search", title), ("per-page", "1")]).await {
            Ok(body) => body,
            Err(result) => return result,
        };

        let Some(work) = body.results.into_iter().next() else {
            debug!("No results for search");
            return AttemptResult::NotFound;
        };

        let ids = work.reference_ids();
        let mut record = match work.into_record() {
            Ok(record) => record,
            Err(field) => return AttemptResult::Incomplete(field),
        };

        if !ids.is_empty() {
            match self.resolve_titles(&ids).await {
                Ok(titles) => {
                    debug!(listed = ids.len(), resolved = titles.len(), "References resolved");
                    record.referenced_titles = titles;
                }
                Err(result) => return result,
            }
        }
        AttemptResult::Found(record)
    }
}

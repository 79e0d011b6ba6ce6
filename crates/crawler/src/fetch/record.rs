//! Crossref `/works` payloads and their mapping onto `FetchedRecord`
//!
//! Every field is optional on the wire. Defaults: a missing abstract is the
//! empty string, a missing citation count is 0, missing lists are empty.

use citecrawl_common::persistence::{NewAuthor, Paper};
use regex_lite::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Metadata for one paper, as fetched
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRecord {
    /// DOI
    pub external_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub abstract_text: String,
    pub authors: Vec<NewAuthor>,
    pub citation_count: i64,
    pub link: Option<String>,
    pub kind: Option<String>,
    pub subjects: Vec<String>,
    /// Titles of cited works, in reference-list order
    pub referenced_titles: Vec<String>,
}

impl FetchedRecord {
    pub fn to_paper(&self) -> Paper {
        Paper {
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            year: self.year,
            abstract_text: self.abstract_text.clone(),
            citation_count: self.citation_count,
            link: self.link.clone(),
            kind: self.kind.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WorksResponse {
    #[serde(default)]
    pub message: WorksMessage,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorksMessage {
    #[serde(default)]
    pub items: Vec<Work>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Work {
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(rename = "DOI", default)]
    pub doi: Option<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub author: Vec<WorkAuthor>,
    #[serde(default)]
    pub is_referenced_by_count: Option<i64>,
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub subject: Vec<String>,
    #[serde(default)]
    pub reference: Vec<WorkReference>,
    #[serde(default)]
    pub published_print: Option<DateParts>,
    #[serde(default)]
    pub published_online: Option<DateParts>,
    #[serde(default)]
    pub created: Option<DateParts>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkAuthor {
    #[serde(default)]
    pub given: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    /// Organisational authors carry only a name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "ORCID", default)]
    pub orcid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkReference {
    #[serde(default)]
    pub article_title: Option<String>,
    #[serde(default)]
    pub journal_title: Option<String>,
    #[serde(default)]
    pub volume_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DateParts {
    /// `[[year, month, day]]`; parts may be null
    #[serde(default)]
    pub date_parts: Vec<Vec<Option<i32>>>,
}

impl DateParts {
    fn year(&self) -> Option<i32> {
        self.date_parts.first()?.first().copied().flatten()
    }
}

pub(super) fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Remove JATS markup and collapse whitespace
pub fn strip_jats(text: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("static regex"));
    tags.replace_all(text, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Last path segment of an ORCID URI
pub(super) fn orcid_id(orcid: &str) -> Option<String> {
    non_empty(orcid.trim_end_matches('/').rsplit('/').next()).map(str::to_string)
}

impl WorkAuthor {
    fn to_author(&self) -> Option<NewAuthor> {
        let given = self.given.as_deref().unwrap_or("").trim();
        let family = self.family.as_deref().unwrap_or("").trim();
        let name = format!("{} {}", given, family).trim().to_string();
        let name = if name.is_empty() {
            non_empty(self.name.as_deref())?.to_string()
        } else {
            name
        };

        Some(NewAuthor {
            name,
            external_author_id: self.orcid.as_deref().and_then(orcid_id),
        })
    }
}

impl WorkReference {
    /// Article title, else journal title, else volume title
    pub fn title(&self) -> Option<&str> {
        non_empty(self.article_title.as_deref())
            .or_else(|| non_empty(self.journal_title.as_deref()))
            .or_else(|| non_empty(self.volume_title.as_deref()))
    }
}

impl Work {
    /// Year from print, then online, then creation date
    pub fn year(&self) -> Option<i32> {
        [&self.published_print, &self.published_online, &self.created]
            .into_iter()
            .flatten()
            .find_map(DateParts::year)
    }

    /// Validate and map. Fails with the name of the first missing required
    /// field.
    pub fn into_record(self) -> std::result::Result<FetchedRecord, &'static str> {
        let title = self
            .title
            .iter()
            .find_map(|t| non_empty(Some(t.as_str())))
            .map(str::to_string)
            .ok_or("title")?;
        let external_id = non_empty(self.doi.as_deref())
            .map(str::to_string)
            .ok_or("DOI")?;

        Ok(FetchedRecord {
            year: self.year(),
            abstract_text: self.abstract_text.as_deref().map(strip_jats).unwrap_or_default(),
            authors: self.author.iter().filter_map(WorkAuthor::to_author).collect(),
            citation_count: self.is_referenced_by_count.unwrap_or(0).max(0),
            link: non_empty(self.url.as_deref()).map(str::to_string),
            kind: non_empty(self.kind.as_deref()).map(str::to_string),
            referenced_titles: self
                .reference
                .iter()
                .filter_map(|r| r.title().map(str::to_string))
                .collect(),
            subjects: self.subject,
            external_id,
            title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORK: &str = r#"{
        "message": {
            "items": [{
                "title": ["Graph Neural Networks: A Review"],
                "DOI": "10.1/abc",
                "abstract": "<jats:p>We survey <jats:italic>graph</jats:italic> models.</jats:p>",
                "author": [
                    {"given": "Jie", "family": "Zhou", "ORCID": "http://orcid.org/0000-0002-1825-0097"},
                    {"given": " Ganqu ", "family": "Cui"},
                    {"name": "GNN Consortium"},
                    {}
                ],
                "is-referenced-by-count": 42,
                "URL": "http://dx.doi.org/10.1/abc",
                "type": "journal-article",
                "subject": ["Computer Science Applications"],
                "created": {"date-parts": [[2018, 12, 20]]},
                "published-online": {"date-parts": [[2020]]},
                "reference": [
                    {"article-title": "Attention is all you need"},
                    {"journal-title": "node2vec"},
                    {"unstructured": "Some citation text"},
                    {"volume-title": "  "}
                ]
            }]
        }
    }"#;

    fn work() -> Work {
        let response: WorksResponse = serde_json::from_str(WORK).unwrap();
        response.message.items.into_iter().next().unwrap()
    }

    #[test]
    fn test_maps_full_work() {
        let record = work().into_record().unwrap();

        assert_eq!(record.external_id, "10.1/abc");
        assert_eq!(record.title, "Graph Neural Networks: A Review");
        assert_eq!(record.abstract_text, "We survey graph models.");
        assert_eq!(record.citation_count, 42);
        assert_eq!(record.kind.as_deref(), Some("journal-article"));
        assert_eq!(record.referenced_titles, vec!["Attention is all you need", "node2vec"]);
    }

    #[test]
    fn test_year_precedence() {
        let mut w = work();
        assert_eq!(w.year(), Some(2020));

        w.published_print = Some(DateParts { date_parts: vec![vec![Some(2019), Some(1)]] });
        assert_eq!(w.year(), Some(2019));

        w.published_print = Some(DateParts { date_parts: vec![vec![None]] });
        w.published_online = None;
        assert_eq!(w.year(), Some(2018));
    }

    #[test]
    fn test_author_mapping() {
        let record = work().into_record().unwrap();
        let names: Vec<&str> = record.authors.iter().map(|a| a.name.as_str()).collect();

        assert_eq!(names, vec!["Jie Zhou", "Ganqu Cui", "GNN Consortium"]);
        assert_eq!(record.authors[0].external_author_id.as_deref(), Some("0000-0002-1825-0097"));
        assert_eq!(record.authors[1].external_author_id, None);
    }

    #[test]
    fn test_missing_optional_fields_take_defaults() {
        let w: Work = serde_json::from_str(r#"{"title": ["node2vec"], "DOI": "10.2/n2v"}"#).unwrap();
        let record = w.into_record().unwrap();

        assert_eq!(record.abstract_text, "");
        assert_eq!(record.citation_count, 0);
        assert_eq!(record.year, None);
        assert!(record.authors.is_empty());
        assert!(record.referenced_titles.is_empty());
    }

    #[test]
    fn test_missing_title_or_doi_is_incomplete() {
        let no_title: Work = serde_json::from_str(r#"{"title": [" "], "DOI": "10.2/x"}"#).unwrap();
        assert_eq!(no_title.into_record().unwrap_err(), "title");

        let no_doi: Work = serde_json::from_str(r#"{"title": ["x"]}"#).unwrap();
        assert_eq!(no_doi.into_record().unwrap_err(), "DOI");
    }

    #[test]
    fn test_strip_jats() {
        assert_eq!(strip_jats("<jats:title>Abstract</jats:title>\n<jats:p>a  b</jats:p>"), "Abstract a b");
        assert_eq!(strip_jats("x < y and y > z"), "x < y and y > z");
    }
}

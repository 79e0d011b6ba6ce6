//! Graph expansion: referenced titles worth scheduling

use crate::fetch::FetchedRecord;
use citecrawl_common::dedup::normalize_title;
use std::collections::HashSet;

/// Reference titles that stand in for a missing one, compared trimmed and
/// case-insensitively
pub const PLACEHOLDERS: &[&str] = &[
    "unstructured",
    "missing",
    "missing title at",
    "none",
    "null",
    "n/a",
    "unknown",
    "untitled",
];

fn is_placeholder(title: &str) -> bool {
    let lowered = title.trim().to_lowercase();
    PLACEHOLDERS.contains(&lowered.as_str())
}

/// Candidate titles cited by a record, in reference order
pub fn expand(record: &FetchedRecord) -> Vec<String> {
    expand_titles(&record.referenced_titles)
}

/// Collapse whitespace, drop empties and placeholders, and keep the first
/// spelling of each normalized title
pub fn expand_titles<S: AsRef<str>>(titles: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    titles
        .iter()
        .map(|t| t.as_ref().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty() && !is_placeholder(t))
        .filter(|t| seen.insert(normalize_title(t)))
        .collect()
}

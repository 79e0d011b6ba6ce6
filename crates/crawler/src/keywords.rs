//! Keyword extraction from abstracts
//!
//! A RAKE-style scorer: candidate phrases are runs of content words between
//! stopwords and punctuation, scored by summed word degree over frequency.

use regex_lite::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Pure text-to-phrases extractor
pub trait KeywordExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<String>;
}

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him",
    "his", "how", "however", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "may",
    "me", "more", "most", "much", "must", "my", "no", "nor", "not", "now", "of", "off", "on",
    "once", "one", "only", "or", "other", "our", "ours", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them", "then",
    "there", "these", "they", "this", "those", "through", "thus", "to", "too", "two", "under",
    "until", "up", "upon", "very", "via", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "within", "without", "would", "you", "your",
    // Academic filler
    "study", "result", "results", "paper", "approach", "method", "methods", "proposed",
    "research", "system", "data", "analysis", "problem", "based", "use", "using", "model",
    "models", "experiment", "experiments", "performance", "propose", "provide", "present",
    "different", "new", "show", "demonstrate", "high", "low", "good", "better", "work", "works",
    "set", "used", "done", "important", "various", "including", "example", "number", "aim",
    "jats",
];

/// Phrases containing any of these are venue or document boilerplate
const STOP_PHRASES: &[&str] = &[
    "proceedings", "conference", "workshop", "symposium", "journal", "transactions", "volume",
    "issue", "international", "book", "chapter", "introduction", "editorial", "poster",
    "abstract", "review", "study", "paper", "report", "meeting",
];

fn venue_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(r"^(proceedings|conference|journal|international)\s+of\s+(the\s+)?")
            .expect("static regex")
    })
}

/// Normalize a candidate phrase, or reject it
///
/// Lowercases, keeps `[a-z0-9 -+]`, collapses whitespace and trims a
/// leading venue prefix. Rejects phrases of more than four words, under
/// three characters, or containing boilerplate.
pub fn clean_keyword(term: &str) -> Option<String> {
    let lowered = term.trim().to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-' || *c == '+')
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    let term = venue_prefix().replace(&collapsed, "").trim().to_string();

    if term.split_whitespace().count() > 4 || term.len() < 3 {
        return None;
    }
    if STOP_PHRASES.iter().any(|p| term.contains(p)) {
        return None;
    }
    Some(term)
}

/// RAKE-style phrase extractor
#[derive(Debug, Clone)]
pub struct PhraseExtractor {
    max_keywords: usize,
    stopwords: HashSet<&'static str>,
}

impl PhraseExtractor {
    pub fn new(max_keywords: usize) -> Self {
        Self {
            max_keywords,
            stopwords: STOPWORDS.iter().copied().collect(),
        }
    }

    /// Runs of content words, split at stopwords and punctuation
    fn candidates(&self, text: &str) -> Vec<Vec<String>> {
        let mut phrases = Vec::new();
        let mut current: Vec<String> = Vec::new();

        for token in text.split_inclusive(|c: char| c.is_whitespace() || ",.;:!?()[]\"".contains(c)) {
            let boundary = token.ends_with(|c: char| ",.;:!?()[]\"".contains(c));
            let word: String = token
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '+')
                .to_lowercase();

            if word.is_empty() || self.stopwords.contains(word.as_str()) || word.chars().all(|c| c.is_ascii_digit()) {
                if !current.is_empty() {
                    phrases.push(std::mem::take(&mut current));
                }
            } else {
                current.push(word);
            }

            if boundary && !current.is_empty() {
                phrases.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            phrases.push(current);
        }
        phrases
    }
}

impl KeywordExtractor for PhraseExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        let phrases = self.candidates(text);
        if phrases.is_empty() || self.max_keywords == 0 {
            return Vec::new();
        }

        let mut frequency: HashMap<&str, f64> = HashMap::new();
        let mut degree: HashMap<&str, f64> = HashMap::new();
        for phrase in &phrases {
            let len = phrase.len() as f64;
            for word in phrase {
                *frequency.entry(word.as_str()).or_default() += 1.0;
                *degree.entry(word.as_str()).or_default() += len;
            }
        }

        let mut scored: Vec<(usize, f64, String)> = phrases
            .iter()
            .enumerate()
            .map(|(i, phrase)| {
                let score: f64 = phrase
                    .iter()
                    .map(|w| degree[w.as_str()] / frequency[w.as_str()])
                    .sum();
                (i, score, phrase.join(" "))
            })
            .collect();
        // Highest score first, earliest occurrence breaks ties
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .filter_map(|(_, _, phrase)| clean_keyword(&phrase))
            .filter(|k| seen.insert(k.clone()))
            .take(self.max_keywords)
            .collect()
    }
}

//! Topical scope filter

/// Decides whether a paper belongs in the crawl
pub trait ScopeClassifier: Send + Sync {
    fn is_in_scope(&self, title: &str, abstract_text: &str, subjects: &[String]) -> bool;
}

/// Subject tags that put a paper in scope on their own
const SUBJECT_MARKERS: &[&str] = &[
    "computer",
    "information",
    "technology",
    "artificial intelligence",
    "informatics",
];

/// Fallback terms looked for in the title or abstract
const CORE_TERMS: &[&str] = &[
    "computer", "data", "algorithm", "learning", "network", "neural",
    "artificial", "intelligence", "software", "hardware", "machine",
    "computing", "programming", "robot", "system", "security",
    "cloud", "blockchain", "bioinformatics", "vision", "processing",
    "graph", "distributed", "quantum", "reinforcement", "cyber",
    "recommender", "language", "informatics", "automation", "database",
];

/// Computing-related papers: by subject tag, else by core term
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputingScope;

impl ScopeClassifier for ComputingScope {
    fn is_in_scope(&self, title: &str, abstract_text: &str, subjects: &[String]) -> bool {
        let by_subject = subjects.iter().any(|s| {
            let s = s.to_lowercase();
            SUBJECT_MARKERS.iter().any(|m| s.contains(m))
        });
        if by_subject {
            return true;
        }

        let title = title.to_lowercase();
        let abstract_text = abstract_text.to_lowercase();
        CORE_TERMS
            .iter()
            .any(|t| title.contains(t) || abstract_text.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_tag_decides() {
        let subjects = vec!["Computer Science Applications".to_string()];
        assert!(ComputingScope.is_in_scope("On Sonnets", "", &subjects));
    }

    #[test]
    fn test_falls_back_to_text() {
        assert!(ComputingScope.is_in_scope("Deep Residual Learning", "", &[]));
        assert!(ComputingScope.is_in_scope("On X", "We train a neural model", &[]));
        assert!(!ComputingScope.is_in_scope("Medieval Poetry", "A study of sonnets", &["Literature".to_string()]));
    }
}

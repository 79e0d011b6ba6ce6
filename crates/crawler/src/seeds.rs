//! Seed list loading
//!
//! Accepts a CSV file with a `Title` header column, or plain text with one
//! title per line.

use crate::errors::{CrawlError, Result};
use std::path::Path;
use tracing::{info, warn};

/// Read seed titles from a file
pub fn load_seeds(path: &Path) -> Result<Vec<String>> {
    let seed_error = |message: String| CrawlError::SeedFile {
        path: path.display().to_string(),
        message,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| seed_error(e.to_string()))?;
    let titles = parse_seeds(&contents).map_err(|e| seed_error(e.to_string()))?;

    info!(path = %path.display(), count = titles.len(), "Seeds loaded");
    Ok(titles)
}

/// Parse seed titles, dropping blanks with a warning
pub fn parse_seeds(contents: &str) -> std::result::Result<Vec<String>, csv::Error> {
    let contents = contents.trim_start_matches('\u{feff}');

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(contents.as_bytes());

    let title_column = reader
        .headers()
        .ok()
        .and_then(|headers| headers.iter().position(|h| h.trim().eq_ignore_ascii_case("title")));

    let Some(column) = title_column else {
        return Ok(parse_lines(contents));
    };

    let mut titles = Vec::new();
    for row in reader.records() {
        let row = row?;
        let title = collapse(row.get(column).unwrap_or_default());
        if title.is_empty() {
            let line = row.position().map(|p| p.line()).unwrap_or_default();
            warn!(line, "Blank seed title dropped");
            continue;
        }
        titles.push(title);
    }
    Ok(titles)
}

/// One title per line, optionally wrapped in quotes
fn parse_lines(contents: &str) -> Vec<String> {
    let mut titles = Vec::new();
    let mut started = false;

    for (index, line) in contents.lines().enumerate() {
        let title = collapse(&unquote(line));
        if title.is_empty() {
            if started {
                warn!(line = index + 1, "Blank seed title dropped");
            }
            continue;
        }
        started = true;
        titles.push(title);
    }
    titles
}

fn unquote(line: &str) -> String {
    let trimmed = line.trim();
    match trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => trimmed.to_string(),
    }
}

fn collapse(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_with_title_column() {
        let csv = "Id,Title,Year\n1,Graph Neural Networks,2018\n2,\"Attention, Is All You Need\",2017\n3,,2020\n";
        assert_eq!(
            parse_seeds(csv).unwrap(),
            vec!["Graph Neural Networks", "Attention, Is All You Need"]
        );
    }

    #[test]
    fn test_quoted_title_may_span_lines() {
        let csv = "Id,Title\n1,\"Graph Neural\nNetworks\"\n2,node2vec\n";
        assert_eq!(parse_seeds(csv).unwrap(), vec!["Graph Neural Networks", "node2vec"]);
    }

    #[test]
    fn test_quote_escapes_and_short_rows() {
        let csv = "Title,Note\n\"The \"\"Missing\"\" Link\",x\n\nnode2vec\n";
        assert_eq!(parse_seeds(csv).unwrap(), vec!["The \"Missing\" Link", "node2vec"]);
    }

    #[test]
    fn test_plain_text_one_per_line() {
        let text = "node2vec\n\n  \"DeepWalk: Online Learning\"  \r\nword2vec\n";
        assert_eq!(
            parse_seeds(text).unwrap(),
            vec!["node2vec", "DeepWalk: Online Learning", "word2vec"]
        );
    }

    #[test]
    fn test_header_match_is_case_insensitive() {
        assert_eq!(parse_seeds("\u{feff}TITLE\nnode2vec\n").unwrap(), vec!["node2vec"]);
        assert_eq!(parse_seeds(" title ,id\nword2vec,1\n").unwrap(), vec!["word2vec"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_seeds(Path::new("/nonexistent/seeds.csv")).unwrap_err();
        assert!(matches!(err, CrawlError::SeedFile { .. }));
    }
}

//! Documentation search over a small embedded vmanomaly corpus.
//!
//! The same corpus backs the MCP resource catalog.

use std::collections::HashMap;

/// URI scheme of documentation resources.
pub const URI_SCHEME: &str = "vmanomaly-docs://";
pub const MARKDOWN_MIME: &str = "text/markdown";

/// One search match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocHit {
    pub uri: String,
    pub title: String,
    pub score: u32,
}

/// A retrievable document.
#[derive(Debug, Clone)]
pub struct DocContent {
    pub uri: String,
    pub title: String,
    pub text: String,
}

/// Keyword search over documentation.
pub trait DocsIndex: Send + Sync + std::fmt::Debug {
    /// Best matches first, at most `limit` of them. The iterator is consumed once.
    fn search<'a>(&'a self, query: &str, limit: usize) -> Box<dyn Iterator<Item = DocHit> + 'a>;

    fn content(&self, uri: &str) -> Option<DocContent>;

    /// Every document, for resource listing.
    fn documents(&self) -> Vec<DocHit>;
}

const CORPUS: &[(&str, &str)] = &[
    ("overview", include_str!("../../docs/overview.md")),
    ("models", include_str!("../../docs/models.md")),
    ("configuration", include_str!("../../docs/configuration.md")),
    ("alerting", include_str!("../../docs/alerting.md")),
    ("upgrades", include_str!("../../docs/upgrades.md")),
];

#[derive(Debug)]
struct Document {
    uri: String,
    title: String,
    text: String,
    title_terms: Vec<String>,
    /// term -> occurrences in the body
    body_terms: HashMap<String, u32>,
}

/// Index over the documentation compiled into the binary.
#[derive(Debug)]
pub struct EmbeddedDocs {
    documents: Vec<Document>,
}

impl Default for EmbeddedDocs {
    fn default() -> Self {
        Self::from_pages(CORPUS.iter().copied())
    }
}

impl EmbeddedDocs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from `(slug, markdown)` pairs. The first `# ` heading is the title.
    pub fn from_pages<'a>(pages: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let documents = pages
            .into_iter()
            .map(|(slug, text)| {
                let title = text
                    .lines()
                    .find_map(|l| l.strip_prefix("# "))
                    .unwrap_or(slug)
                    .trim()
                    .to_string();
                let mut body_terms = HashMap::new();
                for term in tokenize(text) {
                    *body_terms.entry(term).or_insert(0) += 1;
                }
                Document {
                    uri: format!("{URI_SCHEME}{slug}"),
                    title_terms: tokenize(&title).collect(),
                    title,
                    text: text.to_string(),
                    body_terms,
                }
            })
            .collect();
        Self { documents }
    }

    fn score(doc: &Document, terms: &[String]) -> u32 {
        terms
            .iter()
            .map(|term| {
                let title = if doc.title_terms.iter().any(|t| t == term) { 5 } else { 0 };
                let exact = doc.body_terms.get(term).copied().unwrap_or(0) * 2;
                // Prefix matches make "detect" find "detection"; short terms are too noisy.
                let prefix = if exact == 0 && term.len() >= 3 {
                    doc.body_terms
                        .iter()
                        .filter(|(word, _)| word.starts_with(term.as_str()))
                        .map(|(_, n)| *n)
                        .sum()
                } else {
                    0
                };
                title + exact + prefix
            })
            .sum()
    }
}

impl DocsIndex for EmbeddedDocs {
    fn search<'a>(&'a self, query: &str, limit: usize) -> Box<dyn Iterator<Item = DocHit> + 'a> {
        let terms: Vec<String> = tokenize(query).collect();
        if terms.is_empty() {
            return Box::new(std::iter::empty());
        }

        let mut hits: Vec<DocHit> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let score = Self::score(doc, &terms);
                (score > 0).then(|| DocHit {
                    uri: doc.uri.clone(),
                    title: doc.title.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.uri.cmp(&b.uri)));
        Box::new(hits.into_iter().take(limit))
    }

    fn content(&self, uri: &str) -> Option<DocContent> {
        self.documents.iter().find(|d| d.uri == uri).map(|d| DocContent {
            uri: d.uri.clone(),
            title: d.title.clone(),
            text: d.text.clone(),
        })
    }

    fn documents(&self) -> Vec<DocHit> {
        self.documents
            .iter()
            .map(|d| DocHit {
                uri: d.uri.clone(),
                title: d.title.clone(),
                score: 0,
            })
            .collect()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> EmbeddedDocs {
        EmbeddedDocs::from_pages([
            ("zscore", "# Z-score model\nThe zscore model flags points far from the mean."),
            ("prophet", "# Prophet\nSeasonal model. Detection of holidays and trends."),
            ("writer", "# Writer\nWrites anomaly_score series back to VictoriaMetrics."),
        ])
    }

    #[test]
    fn test_title_match_ranks_first() {
        let hits: Vec<_> = index().search("prophet model", 10).collect();
        assert_eq!(hits[0].uri, "vmanomaly-docs://prophet");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_prefix_fallback() {
        let hits: Vec<_> = index().search("detect", 10).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Prophet");
    }

    #[test]
    fn test_limit_and_no_match() {
        let docs = index();
        assert_eq!(docs.search("model", 1).count(), 1);
        assert_eq!(docs.search("kubernetes", 10).count(), 0);
        assert_eq!(docs.search("  ", 10).count(), 0);
    }

    #[test]
    fn test_content_by_uri() {
        let docs = index();
        let doc = docs.content("vmanomaly-docs://writer").unwrap();
        assert!(doc.text.contains("anomaly_score"));
        assert!(docs.content("vmanomaly-docs://missing").is_none());
    }

    #[test]
    fn test_embedded_corpus_is_indexed() {
        let docs = EmbeddedDocs::new();
        assert_eq!(docs.documents().len(), CORPUS.len());
        assert!(docs.search("zscore", 5).next().is_some());
    }
}

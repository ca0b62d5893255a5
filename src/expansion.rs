//! Query expansion: the collaborator trait, its fallbacks, and local
//! salient-term extraction.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{error::Result, tokenizer::query_terms};

/// Words that carry no topical signal on their own.
const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as",
    "at", "be", "been", "but", "by", "can", "could", "did", "do", "does",
    "for", "from", "get", "had", "has", "have", "how", "i", "if", "in",
    "into", "is", "it", "its", "me", "my", "no", "not", "of", "on", "or",
    "our", "should", "so", "some", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "to", "up", "was", "we",
    "were", "what", "when", "where", "which", "who", "why", "will", "with",
    "would", "you", "your",
];

/// Query variants produced by an expander.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpandedQuery {
    /// Recall variants; always includes the original query.
    pub queries: Vec<String>,
    /// Keywords of the original query, used for scoring.
    pub salient_terms: Vec<String>,
    /// Related terms credited at a small fractional weight.
    pub expanded_terms: Vec<String>,
}

impl ExpandedQuery {
    /// The degraded expansion: the query alone.
    pub fn passthrough(query: &str) -> Self {
        Self {
            queries: vec![query.to_string()],
            ..Self::default()
        }
    }

    /// Drop blank and duplicate entries and make sure the original query is
    /// among the recall variants.
    pub fn tidy(mut self, query: &str) -> Self {
        if !self.queries.iter().any(|q| q == query) {
            self.queries.insert(0, query.to_string());
        }
        for list in [
            &mut self.queries,
            &mut self.salient_terms,
            &mut self.expanded_terms,
        ] {
            let mut seen = std::collections::HashSet::new();
            list.retain(|s| !s.trim().is_empty() && seen.insert(s.clone()));
        }
        self
    }
}

/// A source of query variants, typically backed by a language model.
///
/// Implementations may be slow or fail; the pipeline bounds every call with
/// a timeout and falls back to [`ExpandedQuery::passthrough`].
pub trait QueryExpander: Send + Sync {
    fn expand(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<ExpandedQuery>> + Send;
}

/// Performs no expansion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpansion;

impl QueryExpander for NoExpansion {
    async fn expand(&self, query: &str) -> Result<ExpandedQuery> {
        Ok(ExpandedQuery::passthrough(query))
    }
}

/// Expands a query into its own salient terms, without any model.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExpander;

impl QueryExpander for LocalExpander {
    async fn expand(&self, query: &str) -> Result<ExpandedQuery> {
        Ok(ExpandedQuery {
            salient_terms: extract_salient_terms(query),
            ..ExpandedQuery::passthrough(query)
        })
    }
}

/// Keywords of `query`: its tokens minus stop words and single Latin
/// letters, in order of appearance.
///
/// A query made only of stop words has no salient terms.
pub fn extract_salient_terms(query: &str) -> Vec<String> {
    query_terms(query)
        .into_iter()
        .filter(|term| !STOP_WORDS.contains(&term.as_str()))
        .filter(|term| {
            let mut chars = term.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => !c.is_ascii_alphanumeric(),
                _ => true,
            }
        })
        .collect()
}

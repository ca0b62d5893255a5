//! The semantic-index collaborator.

use std::{collections::HashSet, future::Future};

use crate::{
    chunk_id::document_of,
    error::Result,
    result::{RankedResult, SourceEngine},
};

/// An embedding-backed ranking of chunks or documents.
///
/// Results must come from `candidate_ids`; the pipeline drops anything else.
/// A `similarity` (or, failing that, the score) in `[0, 1]` feeds the graph
/// boost's similarity gate.
pub trait SemanticIndex: Send + Sync {
    fn search(
        &self,
        queries: &[String],
        limit: usize,
        candidate_ids: &[String],
    ) -> impl Future<Output = Result<Vec<RankedResult>>> + Send;
}

/// Absent semantic index; retrieval degrades to lexical-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSemanticIndex;

impl SemanticIndex for NoSemanticIndex {
    async fn search(
        &self,
        _queries: &[String],
        _limit: usize,
        _candidate_ids: &[String],
    ) -> Result<Vec<RankedResult>> {
        Ok(Vec::new())
    }
}

/// Keep results that belong to a candidate document, at most `limit`, and
/// tag them as semantic.
pub fn restrict_to_candidates(
    results: Vec<RankedResult>,
    candidate_ids: &[String],
    limit: usize,
) -> Vec<RankedResult> {
    let allowed: HashSet<&str> =
        candidate_ids.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| allowed.contains(document_of(&r.id)))
        .filter(|r| seen.insert(r.id.clone()))
        .take(limit)
        .map(|mut r| {
            r.source = SourceEngine::Semantic;
            r
        })
        .collect()
}

//! The retrieval pipeline.
//!
//! One call runs: option clamping, candidate listing, the query cache,
//! query expansion, an index build under the memory budget, lexical and
//! semantic search side by side, fusion, boosts, normalization and the
//! adaptive cutoff. The index is dropped before the call returns.
//!
//! Cached outcomes are keyed on the candidates' modification times, so an
//! edited, added or removed document is never answered from the cache.

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
    time::Duration,
};

use moka::sync::Cache;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    boost::{FolderBoost, GraphBoost, GraphNode},
    budget::MemoryBudget,
    cancel::CancelToken,
    chunk_id::ChunkId,
    chunking::{Chunk, ChunkCache, Chunker},
    config::{RetrievalConfig, RetrieveOptions},
    cutoff::{self, CutoffConfig},
    document::DocumentStore,
    error::{Error, Result},
    expansion::{ExpandedQuery, NoExpansion, QueryExpander, extract_salient_terms},
    fusion::{FusionConfig, FusionInput, fuse},
    lexical_index::{BuildStats, LexicalIndex, SearchRequest},
    normalize::normalize,
    result::{RankedResult, SourceEngine, sort_by_score},
    semantic::{NoSemanticIndex, SemanticIndex, restrict_to_candidates},
    tokenizer::query_terms,
};

/// Everything one retrieval produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalOutcome {
    pub results: Vec<RankedResult>,
    pub expansion: ExpandedQuery,
    /// Terms used for scoring.
    pub scoring_terms: Vec<String>,
    pub candidates: usize,
    pub build: BuildStats,
    pub lexical_hits: usize,
    pub semantic_hits: usize,
    /// Score threshold applied by the cutoff past its floor.
    pub cutoff_score: f64,
    pub unique_docs: usize,
    /// Results before the cutoff.
    pub total_before: usize,
    /// A collaborator failed or timed out and its fallback was used.
    pub degraded: bool,
    pub cancelled: bool,
    /// Served from the query cache.
    pub cached: bool,
}

/// Per-query retrieval over a [`DocumentStore`].
///
/// # Examples
///
/// ```
/// use chunkrank::{Document, MemoryStore, Retriever, RetrieveOptions};
///
/// let store: MemoryStore = [
///     Document::new("rust.md", "# Ownership\n\nThe borrow checker enforces ownership."),
///     Document::new("cats.md", "# Cats\n\nCats sleep most of the day."),
/// ]
/// .into_iter()
/// .collect();
///
/// let retriever = Retriever::new(store, Default::default());
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// let results = runtime
///     .block_on(retriever.retrieve("borrow checker", &RetrieveOptions::default()));
/// assert_eq!(results[0].document_id(), "rust.md");
/// ```
pub struct Retriever<S, E = NoExpansion, V = NoSemanticIndex> {
    store: S,
    expander: E,
    semantic: V,
    config: RetrievalConfig,
    chunker: Chunker,
    chunk_cache: ChunkCache,
    query_cache: Option<Cache<String, Arc<RetrievalOutcome>>>,
}

impl<S: DocumentStore> Retriever<S> {
    pub fn new(store: S, config: RetrievalConfig) -> Self {
        let chunker = Chunker::new(config.chunking);
        let query_cache = (config.cache.query_cache_entries > 0).then(|| {
            Cache::builder()
                .max_capacity(config.cache.query_cache_entries)
                .time_to_live(Duration::from_secs(
                    config.cache.query_cache_ttl_secs,
                ))
                .build()
        });
        Self {
            store,
            expander: NoExpansion,
            semantic: NoSemanticIndex,
            chunk_cache: ChunkCache::new(config.cache.chunk_cache_bytes),
            chunker,
            config,
            query_cache,
        }
    }
}

impl<S, E, V> Retriever<S, E, V>
where
    S: DocumentStore,
    E: QueryExpander,
    V: SemanticIndex,
{
    pub fn with_expander<E2: QueryExpander>(
        self,
        expander: E2,
    ) -> Retriever<S, E2, V> {
        Retriever {
            store: self.store,
            expander,
            semantic: self.semantic,
            config: self.config,
            chunker: self.chunker,
            chunk_cache: self.chunk_cache,
            query_cache: self.query_cache,
        }
    }

    pub fn with_semantic_index<V2: SemanticIndex>(
        self,
        semantic: V2,
    ) -> Retriever<S, E, V2> {
        Retriever {
            store: self.store,
            expander: self.expander,
            semantic,
            config: self.config,
            chunker: self.chunker,
            chunk_cache: self.chunk_cache,
            query_cache: self.query_cache,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Drop cached query results, e.g. after the store changed.
    pub fn clear_query_cache(&self) {
        if let Some(cache) = &self.query_cache {
            cache.invalidate_all();
        }
    }

    /// Rank chunks for `query`.
    ///
    /// Never fails: collaborator failures degrade the ranking, and a failed
    /// pipeline falls back to matching query terms against document ids.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Vec<RankedResult> {
        self.retrieve_with_cancel(query, options, &CancelToken::new())
            .await
    }

    /// Like [`Retriever::retrieve`], stopping early once `cancel` fires and
    /// returning whatever was ranked by then.
    pub async fn retrieve_with_cancel(
        &self,
        query: &str,
        options: &RetrieveOptions,
        cancel: &CancelToken,
    ) -> Vec<RankedResult> {
        match self.try_retrieve(query, options, cancel).await {
            Ok(outcome) => outcome.results,
            Err(e) => {
                error!(query, error = %e, "retrieval failed, falling back to id matching");
                self.fallback(query, options)
            }
        }
    }

    /// Run the pipeline, reporting failures instead of falling back.
    pub async fn try_retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
        cancel: &CancelToken,
    ) -> Result<RetrievalOutcome> {
        let options = options.clone().clamped();
        let candidates = self.list_candidates(&options)?;
        debug!(query, candidates = candidates.len(), "listed candidates");

        let key = self
            .query_cache
            .as_ref()
            .map(|_| self.cache_key(query, &options, &candidates));
        if let Some(cache) = &self.query_cache
            && let Some(key) = &key
            && let Some(hit) = cache.get(key)
        {
            debug!(query, "query cache hit");
            return Ok(RetrievalOutcome {
                cached: true,
                ..(*hit).clone()
            });
        }

        let (expansion, expansion_degraded) = self.expand(query, cancel).await;
        let scoring_terms = options
            .salient_terms
            .clone()
            .filter(|terms| !terms.is_empty())
            .or_else(|| {
                (!expansion.salient_terms.is_empty())
                    .then(|| expansion.salient_terms.clone())
            })
            .unwrap_or_else(|| extract_salient_terms(query));

        // One index and budget per call.
        let mut index = LexicalIndex::new(self.config.lexical, self.chunker);
        let mut budget = MemoryBudget::new(
            self.config.budget.max_bytes,
            options.candidate_limit,
        );
        let mut checkpoint =
            |processed: usize| debug!(processed, "index build checkpoint");
        let build = index.build(
            &self.store,
            &candidates,
            &self.chunk_cache,
            &mut budget,
            cancel,
            &mut checkpoint,
        )?;

        let limit = self.config.lexical.recall_limit.max(options.max_results);

        let request = SearchRequest {
            queries: &expansion.queries,
            limit,
            scoring_terms: &scoring_terms,
            original_query: query,
            expanded_terms: &expansion.expanded_terms,
            explain: options.explain,
        };
        let searched = &index;
        // The semantic call is polled first so it is in flight while the
        // lexical search runs.
        let ((semantic, semantic_degraded), lexical) = tokio::join!(
            self.semantic_search(&expansion.queries, limit, &candidates, cancel),
            async {
                if cancel.is_cancelled() {
                    Ok(Vec::new())
                } else {
                    searched.search(&request)
                }
            },
        );
        index.clear();
        budget.clear();
        let lexical = lexical?;

        let fusion = FusionConfig {
            lexical_weight: 1.0 - options.semantic_weight,
            semantic_weight: options.semantic_weight,
            ..self.config.fusion
        };
        let mut results = fuse(FusionInput {
            lexical: &lexical,
            semantic: &semantic,
            config: fusion,
        });

        if options.enable_boosts && !cancel.is_cancelled() {
            results = FolderBoost::new(self.config.folder_boost)
                .apply_boosts(results, |folder| self.store.folder_size(folder));
            results = self.graph_boost(results);
        }

        let results = normalize(results, &self.config.normalization);
        let selected = cutoff::select(
            results,
            &CutoffConfig {
                ceiling: options.max_results,
                ..self.config.cutoff
            },
        );

        let mut results = selected.results;
        if !options.explain {
            for result in &mut results {
                result.explanation = None;
            }
        }

        let cancelled = cancel.is_cancelled();
        let degraded = expansion_degraded || semantic_degraded;
        info!(
            query,
            results = results.len(),
            unique_docs = selected.unique_docs,
            chunks = build.chunks,
            degraded,
            cancelled,
            "retrieval finished"
        );

        let outcome = RetrievalOutcome {
            results,
            expansion,
            scoring_terms,
            candidates: candidates.len(),
            lexical_hits: lexical.len(),
            semantic_hits: semantic.len(),
            cutoff_score: selected.cutoff_score,
            unique_docs: selected.unique_docs,
            total_before: selected.total_before,
            build,
            degraded,
            cancelled,
            cached: false,
        };

        if let Some(cache) = &self.query_cache
            && let Some(key) = key
            && !outcome.cancelled
            && !outcome.degraded
            && outcome.build.aborted.is_none()
        {
            cache.insert(key, Arc::new(outcome.clone()));
        }
        Ok(outcome)
    }

    /// Look up one chunk by id, re-chunking its document if needed.
    pub fn chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let Some(chunk_id) = ChunkId::parse(id) else {
            return Ok(None);
        };
        let prepared = match self.chunk_cache.get_or_prepare(
            &self.store,
            &self.chunker,
            self.config.lexical.max_document_bytes,
            &chunk_id.document_id,
        ) {
            Ok(prepared) => prepared,
            Err(Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(prepared
            .chunks
            .iter()
            .find(|chunk| chunk.index == chunk_id.index)
            .cloned())
    }

    /// Query, options and a digest of every candidate's id and modification
    /// time.
    fn cache_key(
        &self,
        query: &str,
        options: &RetrieveOptions,
        candidates: &[String],
    ) -> String {
        let mut hasher = DefaultHasher::new();
        for id in candidates {
            id.hash(&mut hasher);
            match self.store.modified_at(id) {
                Ok(modified_at) => modified_at.hash(&mut hasher),
                Err(e) => {
                    debug!(id, error = %e, "no modification time for cache key");
                    u64::MAX.hash(&mut hasher);
                }
            }
        }
        format!(
            "{query}\u{1f}{}\u{1f}{:016x}",
            options.fingerprint(),
            hasher.finish()
        )
    }

    fn list_candidates(&self, options: &RetrieveOptions) -> Result<Vec<String>> {
        let filter = options.filter.as_ref();
        let mut candidates = self
            .store
            .list_candidates(&|id| filter.is_none_or(|f| f.matches(id)))?;
        candidates.truncate(options.candidate_limit);
        Ok(candidates)
    }

    /// Expand the query, falling back to the query alone on failure,
    /// timeout or cancellation. The flag reports a failure or timeout.
    async fn expand(
        &self,
        query: &str,
        cancel: &CancelToken,
    ) -> (ExpandedQuery, bool) {
        let after = self.config.timeouts.expansion();
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(after, self.expander.expand(query)) => outcome,
            () = cancel.cancelled() => {
                debug!(query, "query expansion abandoned");
                return (ExpandedQuery::passthrough(query), false);
            }
        };

        match outcome {
            Ok(Ok(expanded)) => (expanded.tidy(query), false),
            Ok(Err(e)) => {
                warn!(query, error = %e, "query expansion failed, using the query alone");
                (ExpandedQuery::passthrough(query), true)
            }
            Err(_) => {
                let e = Error::ExternalTimeout {
                    collaborator: "query expander",
                    after,
                };
                warn!(query, error = %e, "using the query alone");
                (ExpandedQuery::passthrough(query), true)
            }
        }
    }

    /// Semantic ranking restricted to the candidates; empty on failure,
    /// timeout or cancellation. The flag reports a failure or timeout.
    async fn semantic_search(
        &self,
        queries: &[String],
        limit: usize,
        candidates: &[String],
        cancel: &CancelToken,
    ) -> (Vec<RankedResult>, bool) {
        let after = self.config.timeouts.semantic();
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(
                after,
                self.semantic.search(queries, limit, candidates),
            ) => outcome,
            () = cancel.cancelled() => {
                debug!("semantic search abandoned");
                return (Vec::new(), false);
            }
        };

        match outcome {
            Ok(Ok(results)) => {
                (restrict_to_candidates(results, candidates, limit), false)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "semantic search failed, ranking lexically");
                (Vec::new(), true)
            }
            Err(_) => {
                let e = Error::ExternalTimeout {
                    collaborator: "semantic index",
                    after,
                };
                warn!(error = %e, "ranking lexically");
                (Vec::new(), true)
            }
        }
    }

    /// Load link neighbourhoods for the documents the graph boost will
    /// analyse, then apply it.
    fn graph_boost(&self, results: Vec<RankedResult>) -> Vec<RankedResult> {
        let boost = GraphBoost::new(self.config.graph_boost);
        let qualifying = boost.qualifying_documents(&results);
        if qualifying.len() < self.config.graph_boost.min_qualifying.max(2) {
            return results;
        }

        let mut nodes = HashMap::with_capacity(qualifying.len());
        for id in qualifying {
            match self.store.get_document(&id) {
                Ok(Some(doc)) => {
                    let node = GraphNode::new(doc.out_links, doc.in_links, doc.tags);
                    nodes.insert(id, node);
                }
                Ok(None) => {}
                Err(e) => debug!(id, error = %e, "no link data for document"),
            }
        }
        boost.apply_boost(results, &nodes)
    }

    /// Rank candidate ids by the share of query terms they contain.
    ///
    /// This is the last resort [`Retriever::retrieve`] uses when the
    /// pipeline fails; hosts that called [`Retriever::try_retrieve`] can use
    /// it directly instead of running the pipeline again.
    pub fn fallback(&self, query: &str, options: &RetrieveOptions) -> Vec<RankedResult> {
        let options = options.clone().clamped();
        let terms = query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let candidates = match self.list_candidates(&options) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "fallback could not list candidates");
                return Vec::new();
            }
        };

        let mut results: Vec<RankedResult> = candidates
            .into_iter()
            .filter_map(|id| {
                let haystack = id.to_lowercase();
                let hits = terms
                    .iter()
                    .filter(|term| haystack.contains(term.as_str()))
                    .count();
                (hits > 0).then(|| {
                    let score = hits as f64 / terms.len() as f64;
                    RankedResult::new(id, score, SourceEngine::Lexical)
                })
            })
            .collect();
        sort_by_score(&mut results);
        results.truncate(options.max_results);
        results
    }
}

impl<S, E, V> std::fmt::Debug for Retriever<S, E, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

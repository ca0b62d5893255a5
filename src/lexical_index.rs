//! Ephemeral multi-field lexical index over chunks.
//!
//! The index lives in RAM and is rebuilt for every query. Each chunk becomes
//! one tantivy document with a text field per [`FieldKind`]; document-level
//! metadata (title, path, tags, properties, links) is replicated into every
//! chunk of the document so each chunk can be found on its own.
//!
//! Searching runs in two phases. Every query variant is used for recall,
//! building the candidate pool. Only the original query and the salient
//! terms contribute to scoring; expanded terms add a small, separately
//! tracked amount. Chunks found only through recall variants or expanded
//! terms always score below the weakest directly matched chunk.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::TopDocs,
    query::{BooleanQuery, Occur, Query, TermQuery},
    schema::{
        Field,
        IndexRecordOption,
        STORED,
        STRING,
        Schema,
        TextFieldIndexing,
        TextOptions,
        Value,
    },
    tokenizer::TextAnalyzer,
};
use tracing::{debug, error, warn};

use crate::{
    budget::MemoryBudget,
    cancel::CancelToken,
    chunking::{Chunk, ChunkCache, Chunker, DocumentFields},
    document::DocumentStore,
    error::{Error, Result},
    result::{
        Explanation,
        FieldKind,
        LexicalMatch,
        RankedResult,
        SourceEngine,
        sort_by_score,
    },
    tokenizer::{ChunkTokenizer, TOKENIZER_NAME, query_terms},
};

const CHUNK_ID_FIELD: &str = "chunk_id";

/// Minimum writer heap tantivy accepts for a single thread.
const MIN_WRITER_HEAP: usize = 15_000_000;

/// Share of the weakest direct score that indirect matches are scaled into.
const INDIRECT_CEILING: f64 = 0.1;

/// Weight of recall position when ordering indirect matches.
const RECALL_WEIGHT: f64 = 0.01;

/// Lexical index tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    /// Bodies above this size are truncated before chunking.
    pub max_document_bytes: usize,
    /// Invoke the build checkpoint every this many documents.
    pub yield_every: usize,
    pub writer_heap_bytes: usize,
    /// Hits fetched per query variant and field.
    pub recall_limit: usize,
    /// Weight of a query containing whitespace.
    pub phrase_weight: f64,
    /// Weight of a single-term query.
    pub term_weight: f64,
    /// Fraction of a normal contribution credited to expanded terms.
    pub expanded_weight: f64,
    pub multi_field_bonus: f64,
    pub coverage_bonus: f64,
    pub path_bonus: f64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: 1024 * 1024,
            yield_every: 25,
            writer_heap_bytes: MIN_WRITER_HEAP,
            recall_limit: 1000,
            phrase_weight: 1.5,
            term_weight: 1.0,
            expanded_weight: 0.1,
            multi_field_bonus: 0.2,
            coverage_bonus: 0.1,
            path_bonus: 1.5,
        }
    }
}

/// Outcome of one index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Candidates whose chunks were indexed.
    pub documents: usize,
    pub chunks: usize,
    /// Candidates skipped because they were missing, unsafe or unreadable.
    pub skipped: usize,
    pub truncated: usize,
    pub budget_exhausted: bool,
    pub cancelled: bool,
    /// Set when adding a chunk failed and the build stopped early.
    pub aborted: Option<String>,
}

/// One search over the built index.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    /// Query variants used for recall only.
    pub queries: &'a [String],
    pub limit: usize,
    /// Salient terms; these score alongside the original query.
    pub scoring_terms: &'a [String],
    pub original_query: &'a str,
    /// Expansion terms credited at the fractional expanded weight.
    pub expanded_terms: &'a [String],
    pub explain: bool,
}

#[derive(Clone, Copy)]
struct SchemaFields {
    chunk_id: Field,
    text: [Field; 8],
}

impl SchemaFields {
    fn get(&self, kind: FieldKind) -> Field {
        self.text[kind as usize]
    }
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();
    let chunk_id = builder.add_text_field(CHUNK_ID_FIELD, STRING | STORED);

    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_NAME)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let text = FieldKind::ALL
        .map(|kind| builder.add_text_field(kind.name(), text_opts.clone()));

    (builder.build(), SchemaFields { chunk_id, text })
}

fn register_tokenizer(index: &Index) {
    index
        .tokenizers()
        .register(TOKENIZER_NAME, TextAnalyzer::from(ChunkTokenizer));
}

struct BuiltIndex {
    reader: IndexReader,
    fields: SchemaFields,
    chunk_count: usize,
}

/// The per-query lexical index.
///
/// Not shareable between concurrent builders: `build` and `clear` take
/// `&mut self`, so a search can never overlap a build on the same instance.
pub struct LexicalIndex {
    config: LexicalConfig,
    chunker: Chunker,
    built: Option<BuiltIndex>,
}

#[derive(Default)]
struct Accumulator {
    direct: f64,
    expanded: f64,
    recall: f64,
    fields: BTreeSet<FieldKind>,
    queries: BTreeSet<usize>,
    matches: Vec<LexicalMatch>,
}

impl LexicalIndex {
    pub fn new(config: LexicalConfig, chunker: Chunker) -> Self {
        Self {
            config,
            chunker,
            built: None,
        }
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    pub fn chunk_count(&self) -> usize {
        self.built.as_ref().map_or(0, |b| b.chunk_count)
    }

    /// Drop the index and everything it holds.
    pub fn clear(&mut self) {
        self.built = None;
    }

    /// Build the index from `candidate_ids`.
    ///
    /// The budget is cleared first. At most `budget.candidate_limit()`
    /// candidates are read; missing or unreadable documents are logged and
    /// skipped. Indexing stops when the byte budget is exhausted, when
    /// `cancel` fires, or when tantivy refuses a chunk; in every case the
    /// chunks added so far are committed and remain searchable.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &mut self,
        store: &dyn DocumentStore,
        candidate_ids: &[String],
        cache: &ChunkCache,
        budget: &mut MemoryBudget,
        cancel: &CancelToken,
        checkpoint: &mut dyn FnMut(usize),
    ) -> Result<BuildStats> {
        self.clear();
        budget.clear();

        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        register_tokenizer(&index);
        let mut writer: IndexWriter = index.writer_with_num_threads(
            1,
            self.config.writer_heap_bytes.max(MIN_WRITER_HEAP),
        )?;

        let mut stats = BuildStats::default();
        let yield_every = self.config.yield_every.max(1);

        'candidates: for (n, id) in
            candidate_ids.iter().take(budget.candidate_limit()).enumerate()
        {
            if n > 0 && n % yield_every == 0 {
                checkpoint(n);
            }
            if cancel.is_cancelled() {
                debug!(processed = n, "index build cancelled");
                stats.cancelled = true;
                break;
            }

            let prepared = match cache.get_or_prepare(
                store,
                &self.chunker,
                self.config.max_document_bytes,
                id,
            ) {
                Ok(prepared) => prepared,
                Err(e) => {
                    if e.is_per_document() {
                        debug!(id = %id, error = %e, "skipping candidate");
                    } else {
                        warn!(id = %id, error = %e, "skipping candidate");
                    }
                    stats.skipped += 1;
                    continue;
                }
            };
            if prepared.truncated {
                stats.truncated += 1;
            }

            let field_bytes = prepared_field_bytes(&prepared.fields);
            for chunk in &prepared.chunks {
                if !budget.try_reserve(chunk.content.len() + field_bytes) {
                    warn!(
                        used = budget.used(),
                        limit = budget.max_bytes(),
                        chunks = stats.chunks,
                        "memory budget exhausted, indexing stopped"
                    );
                    stats.budget_exhausted = true;
                    break 'candidates;
                }
                let doc = to_tantivy(&fields, &prepared.fields, chunk);
                if let Err(e) = writer.add_document(doc) {
                    error!(id = %chunk.id, error = %e, "index build aborted");
                    stats.aborted = Some(e.to_string());
                    break 'candidates;
                }
                stats.chunks += 1;
            }
            stats.documents += 1;
        }

        writer
            .commit()
            .map_err(|e| Error::IndexBuild(e.to_string()))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        debug!(
            documents = stats.documents,
            chunks = stats.chunks,
            skipped = stats.skipped,
            bytes = budget.used(),
            "lexical index built"
        );

        self.built = Some(BuiltIndex {
            reader,
            fields,
            chunk_count: stats.chunks,
        });
        Ok(stats)
    }

    /// Rank chunks against a request.
    ///
    /// Returns an empty list when nothing was built, no query has any
    /// tokens, or nothing matched.
    pub fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<RankedResult>> {
        let Some(built) = &self.built else {
            return Ok(Vec::new());
        };
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = built.reader.searcher();
        let mut ids: HashMap<DocAddress, String> = HashMap::new();
        let mut hits = |query: &str, kind: FieldKind| -> Result<Vec<String>> {
            let terms = query_terms(query);
            if terms.is_empty() {
                return Ok(Vec::new());
            }
            let field = built.fields.get(kind);
            let mut clauses: Vec<(Occur, Box<dyn Query>)> = terms
                .iter()
                .map(|term| {
                    let query: Box<dyn Query> = Box::new(TermQuery::new(
                        Term::from_field_text(field, term),
                        IndexRecordOption::WithFreqs,
                    ));
                    (Occur::Must, query)
                })
                .collect();
            let query: Box<dyn Query> = if clauses.len() == 1 {
                clauses.remove(0).1
            } else {
                Box::new(BooleanQuery::new(clauses))
            };

            let top = searcher
                .search(&*query, &TopDocs::with_limit(self.config.recall_limit))?;
            let mut ranked = Vec::with_capacity(top.len());
            for (_score, address) in top {
                if let Some(id) = ids.get(&address) {
                    ranked.push(id.clone());
                    continue;
                }
                let doc: TantivyDocument = searcher.doc(address)?;
                let id = doc
                    .get_first(built.fields.chunk_id)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                ids.insert(address, id.clone());
                ranked.push(id);
            }
            Ok(ranked)
        };

        let mut pool: HashMap<String, Accumulator> = HashMap::new();

        // Recall: every variant contributes candidates, never score.
        let recall_queries = request
            .queries
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(request.original_query))
            .chain(request.scoring_terms.iter().map(String::as_str))
            .chain(request.expanded_terms.iter().map(String::as_str));
        for query in recall_queries {
            for kind in FieldKind::ALL {
                for (rank, id) in hits(query, kind)?.into_iter().enumerate() {
                    let entry = pool.entry(id).or_default();
                    entry.recall = entry.recall.max(position_score(rank));
                }
            }
        }
        if pool.is_empty() {
            return Ok(Vec::new());
        }

        // Scoring: original query and salient terms only.
        let scoring: Vec<&str> = std::iter::once(request.original_query)
            .chain(request.scoring_terms.iter().map(String::as_str))
            .filter(|q| !q.trim().is_empty())
            .collect();
        for (query_index, query) in scoring.iter().enumerate() {
            let query_weight = self.query_weight(query);
            for kind in FieldKind::ALL {
                for (rank, id) in hits(query, kind)?.into_iter().enumerate() {
                    let Some(entry) = pool.get_mut(&id) else { continue };
                    let weight =
                        position_score(rank) * kind.weight() * query_weight;
                    entry.direct += weight;
                    entry.fields.insert(kind);
                    entry.queries.insert(query_index);
                    if request.explain {
                        entry.matches.push(LexicalMatch {
                            field: kind,
                            query: query.to_string(),
                            weight,
                        });
                    }
                }
            }
        }

        for term in request.expanded_terms {
            let query_weight = self.query_weight(term) * self.config.expanded_weight;
            for kind in FieldKind::ALL {
                for (rank, id) in hits(term, kind)?.into_iter().enumerate() {
                    if let Some(entry) = pool.get_mut(&id) {
                        entry.expanded +=
                            position_score(rank) * kind.weight() * query_weight;
                    }
                }
            }
        }

        let mut results = self.finish(pool, &scoring, request.explain);
        results.truncate(request.limit);
        Ok(results)
    }

    fn query_weight(&self, query: &str) -> f64 {
        if query.trim().contains(char::is_whitespace) {
            self.config.phrase_weight
        } else {
            self.config.term_weight
        }
    }

    /// Apply bonuses and place indirect matches below every direct one.
    fn finish(
        &self,
        pool: HashMap<String, Accumulator>,
        scoring: &[&str],
        explain: bool,
    ) -> Vec<RankedResult> {
        let phrases: Vec<String> = scoring
            .iter()
            .filter(|q| q.trim().contains(char::is_whitespace))
            .map(|q| q.trim().to_lowercase())
            .collect();

        let mut direct = Vec::new();
        let mut indirect = Vec::new();
        for (id, acc) in pool {
            if acc.direct > 0.0 {
                let mut score = acc.direct;
                score *= 1.0
                    + self.config.multi_field_bonus
                        * (acc.fields.len() as f64 - 1.0);
                score *= 1.0
                    + self.config.coverage_bonus
                        * (acc.queries.len() as f64 - 1.0);
                let path = crate::chunk_id::document_of(&id).to_lowercase();
                if phrases.iter().any(|p| path.contains(p.as_str())) {
                    score *= self.config.path_bonus;
                }
                direct.push((id, score + acc.expanded, acc));
            } else {
                let score = acc.expanded + RECALL_WEIGHT * acc.recall;
                indirect.push((id, score, acc));
            }
        }

        let min_direct = direct
            .iter()
            .map(|(_, score, _)| *score)
            .fold(f64::INFINITY, f64::min);
        let max_indirect = indirect
            .iter()
            .map(|(_, score, _)| *score)
            .fold(0.0_f64, f64::max);
        if !direct.is_empty() && max_indirect > 0.0 {
            for (_, score, _) in &mut indirect {
                *score = min_direct * INDIRECT_CEILING * (*score / max_indirect);
            }
        }

        let mut results: Vec<RankedResult> = direct
            .into_iter()
            .chain(indirect)
            .map(|(id, score, acc)| {
                let mut result = RankedResult::new(id, score, SourceEngine::Lexical);
                if explain {
                    let mut explanation = Explanation::new(score);
                    explanation.lexical_matches = acc.matches;
                    explanation.expanded_boost =
                        (acc.expanded > 0.0).then_some(acc.expanded);
                    result.explanation = Some(explanation);
                }
                result
            })
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        sort_by_score(&mut results);
        results
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("chunks", &self.chunk_count())
            .finish_non_exhaustive()
    }
}

fn position_score(rank: usize) -> f64 {
    1.0 / (rank as f64 + 1.0)
}

fn prepared_field_bytes(fields: &DocumentFields) -> usize {
    fields.title.len()
        + fields.path.len()
        + fields.tags.iter().map(String::len).sum::<usize>()
        + fields.properties.iter().map(|p| p.text.len()).sum::<usize>()
        + fields.links.iter().map(String::len).sum::<usize>()
}

fn to_tantivy(
    schema: &SchemaFields,
    fields: &DocumentFields,
    chunk: &Chunk,
) -> TantivyDocument {
    let mut doc = TantivyDocument::default();
    doc.add_text(schema.chunk_id, &chunk.id);
    doc.add_text(schema.get(FieldKind::Title), &fields.title);
    doc.add_text(schema.get(FieldKind::Path), &fields.path);
    doc.add_text(schema.get(FieldKind::Heading), &chunk.heading);
    doc.add_text(schema.get(FieldKind::Body), &chunk.content);
    for tag in &fields.tags {
        doc.add_text(schema.get(FieldKind::Tag), tag);
    }
    for link in &fields.links {
        doc.add_text(schema.get(FieldKind::Link), link);
    }
    for property in &fields.properties {
        let kind = if property.literal {
            FieldKind::PropertyLiteral
        } else {
            FieldKind::Property
        };
        doc.add_text(schema.get(kind), &property.text);
    }
    doc
}

use std::{
    fs::OpenOptions,
    path::Path,
    time::{Duration, Instant, SystemTime},
};

use chunkrank::{
    CancelToken,
    Document,
    Error,
    ExpandedQuery,
    FsDocumentStore,
    MemoryStore,
    QueryExpander,
    RankedResult,
    RetrievalConfig,
    RetrieveOptions,
    Retriever,
    SemanticIndex,
    SourceEngine,
    config::CandidateFilter,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Returns a fixed ranking after a delay.
struct FixedSemantic {
    ranking: Vec<(&'static str, f64)>,
    delay: Duration,
}

impl SemanticIndex for FixedSemantic {
    async fn search(
        &self,
        _queries: &[String],
        limit: usize,
        _candidate_ids: &[String],
    ) -> chunkrank::Result<Vec<RankedResult>> {
        tokio::time::sleep(self.delay).await;
        Ok(self
            .ranking
            .iter()
            .take(limit)
            .map(|(id, score)| {
                RankedResult::new(*id, *score, SourceEngine::Semantic)
                    .with_similarity(*score)
            })
            .collect())
    }
}

struct FailingExpander;

impl QueryExpander for FailingExpander {
    async fn expand(&self, _query: &str) -> chunkrank::Result<ExpandedQuery> {
        Err(Error::External {
            collaborator: "query expander",
            message: "model offline".to_string(),
        })
    }
}

/// Adds fixed related terms.
struct SynonymExpander(Vec<&'static str>);

impl QueryExpander for SynonymExpander {
    async fn expand(&self, query: &str) -> chunkrank::Result<ExpandedQuery> {
        Ok(ExpandedQuery {
            expanded_terms: self.0.iter().map(|t| t.to_string()).collect(),
            ..ExpandedQuery::passthrough(query)
        })
    }
}

fn memory_store(docs: &[(&str, &str)]) -> MemoryStore {
    docs.iter()
        .map(|(id, body)| Document {
            modified_at: 1,
            ..Document::new(*id, *body)
        })
        .collect()
}

fn write_vault(root: &Path, files: &[(&str, &str)]) -> std::io::Result<()> {
    for (path, content) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, content)?;
    }
    Ok(())
}

fn documents(results: &[RankedResult]) -> Vec<&str> {
    results.iter().map(RankedResult::document_id).collect()
}

fn explained() -> RetrieveOptions {
    RetrieveOptions {
        explain: true,
        ..RetrieveOptions::default()
    }
}

#[tokio::test]
async fn cutoff_keeps_floor_then_threshold() -> TestResult {
    let docs: Vec<(String, String)> = (0..8)
        .map(|i| (format!("doc{i}.md"), "Notes on rank fusion.".to_string()))
        .collect();
    let store: MemoryStore = docs
        .iter()
        .map(|(id, body)| Document::new(id.as_str(), body.as_str()))
        .collect();
    let retriever = Retriever::new(store, RetrievalConfig::default());

    let outcome = retriever
        .try_retrieve("rank fusion", &RetrieveOptions::default(), &CancelToken::new())
        .await?;
    assert_eq!(outcome.total_before, 8);
    assert!(outcome.results.len() >= 5);
    assert_eq!(outcome.unique_docs, outcome.results.len());
    assert!(outcome.results.iter().all(|r| r.score > 0.0 && r.score < 1.0));
    assert!(
        outcome.results[5..]
            .iter()
            .all(|r| r.score >= outcome.cutoff_score)
    );
    assert!(outcome.results.windows(2).all(|w| w[0].score > w[1].score));
    Ok(())
}

#[tokio::test]
async fn semantic_results_fuse_with_lexical() -> TestResult {
    let store = memory_store(&[
        ("rust.md", "Rust ownership and borrowing."),
        ("cats.md", "Cats sleep all day."),
    ]);
    let retriever = Retriever::new(store, RetrievalConfig::default())
        .with_semantic_index(FixedSemantic {
            ranking: vec![("outside.md#0", 0.95), ("cats.md#0", 0.9)],
            delay: Duration::ZERO,
        });

    let outcome = retriever
        .try_retrieve("rust", &RetrieveOptions::default(), &CancelToken::new())
        .await?;
    assert_eq!(outcome.semantic_hits, 1);
    assert_eq!(outcome.lexical_hits, 1);
    // Both lead their own ranking; the semantic side weighs more.
    assert_eq!(documents(&outcome.results), vec!["cats.md", "rust.md"]);
    assert!(outcome.results.iter().all(|r| r.source == SourceEngine::Fused));
    assert!(!outcome.degraded);
    Ok(())
}

#[tokio::test]
async fn slow_semantic_index_degrades_to_lexical() -> TestResult {
    let store = memory_store(&[("rust.md", "Rust ownership.")]);
    let mut config = RetrievalConfig::default();
    config.timeouts.semantic_ms = 50;
    let retriever = Retriever::new(store, config).with_semantic_index(FixedSemantic {
        ranking: vec![("rust.md#0", 0.9)],
        delay: Duration::from_secs(30),
    });

    let started = Instant::now();
    let outcome = retriever
        .try_retrieve("ownership", &RetrieveOptions::default(), &CancelToken::new())
        .await?;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(outcome.degraded);
    assert_eq!(outcome.semantic_hits, 0);
    assert_eq!(documents(&outcome.results), vec!["rust.md"]);

    // Degraded runs are not cached.
    let again = retriever
        .try_retrieve("ownership", &RetrieveOptions::default(), &CancelToken::new())
        .await?;
    assert!(!again.cached);
    Ok(())
}

#[tokio::test]
async fn failing_expander_falls_back_to_query() -> TestResult {
    let store = memory_store(&[("rust.md", "Rust ownership.")]);
    let retriever = Retriever::new(store, RetrievalConfig::default())
        .with_expander(FailingExpander);

    let outcome = retriever
        .try_retrieve("ownership", &RetrieveOptions::default(), &CancelToken::new())
        .await?;
    assert!(outcome.degraded);
    assert_eq!(outcome.expansion, ExpandedQuery::passthrough("ownership"));
    assert_eq!(outcome.scoring_terms, vec!["ownership"]);
    assert_eq!(documents(&outcome.results), vec!["rust.md"]);
    Ok(())
}

#[tokio::test]
async fn expansion_only_matches_rank_below_direct_matches() -> TestResult {
    let store = memory_store(&[
        ("a.md", "automobile automobile automobile repair manual"),
        ("b.md", "my car needs a new battery"),
    ]);
    let retriever = Retriever::new(store, RetrievalConfig::default())
        .with_expander(SynonymExpander(vec!["automobile"]));

    let results = retriever.retrieve("car", &explained()).await;
    assert_eq!(documents(&results), vec!["b.md", "a.md"]);
    assert!(results[0].score > results[1].score);
    Ok(())
}

#[tokio::test]
async fn caller_salient_terms_take_precedence() -> TestResult {
    let store = memory_store(&[
        ("rust.md", "Rust ownership."),
        ("cats.md", "Cats sleep."),
    ]);
    let retriever = Retriever::new(store, RetrievalConfig::default());
    let options = RetrieveOptions {
        salient_terms: Some(vec!["ownership".to_string()]),
        ..RetrieveOptions::default()
    };

    let outcome = retriever
        .try_retrieve("tell me everything", &options, &CancelToken::new())
        .await?;
    assert_eq!(outcome.scoring_terms, vec!["ownership"]);
    assert_eq!(documents(&outcome.results), vec!["rust.md"]);
    Ok(())
}

#[tokio::test]
async fn glob_filter_restricts_candidates() -> TestResult {
    let store = memory_store(&[
        ("work/rust.md", "Rust ownership."),
        ("home/rust.md", "Rust at home."),
    ]);
    let retriever = Retriever::new(store, RetrievalConfig::default());
    let options = RetrieveOptions {
        filter: Some(CandidateFilter::new(&["work/**".to_string()])?),
        ..RetrieveOptions::default()
    };

    let outcome = retriever
        .try_retrieve("rust", &options, &CancelToken::new())
        .await?;
    assert_eq!(outcome.candidates, 1);
    assert_eq!(documents(&outcome.results), vec!["work/rust.md"]);
    Ok(())
}

#[tokio::test]
async fn cancelled_before_start_returns_nothing() -> TestResult {
    let store = memory_store(&[("rust.md", "Rust ownership.")]);
    let retriever = Retriever::new(store, RetrievalConfig::default());
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = retriever
        .try_retrieve("rust", &RetrieveOptions::default(), &cancel)
        .await?;
    assert!(outcome.cancelled);
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.build.chunks, 0);

    // Cancelled runs are not cached.
    let fresh = retriever
        .try_retrieve("rust", &RetrieveOptions::default(), &CancelToken::new())
        .await?;
    assert!(!fresh.cached);
    assert_eq!(documents(&fresh.results), vec!["rust.md"]);
    Ok(())
}

#[tokio::test]
async fn cancellation_abandons_in_flight_semantic_search() -> TestResult {
    let store = memory_store(&[("rust.md", "Rust ownership.")]);
    let retriever = Retriever::new(store, RetrievalConfig::default())
        .with_semantic_index(FixedSemantic {
            ranking: vec![("rust.md#0", 0.9)],
            delay: Duration::from_secs(30),
        });
    let cancel = CancelToken::new();
    let options = RetrieveOptions::default();

    let started = Instant::now();
    let (outcome, ()) = tokio::join!(
        retriever.try_retrieve("rust", &options, &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        },
    );
    let outcome = outcome?;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(outcome.cancelled);
    assert_eq!(outcome.semantic_hits, 0);
    // The lexical search finished before the signal.
    assert_eq!(documents(&outcome.results), vec!["rust.md"]);
    Ok(())
}

#[tokio::test]
async fn coherent_folder_is_boosted() -> TestResult {
    let tempdir = tempfile::tempdir()?;
    let mut files = Vec::new();
    for i in 0..5 {
        let body = if i < 3 {
            "Ownership moves values between bindings."
        } else {
            "Unrelated gardening notes."
        };
        files.push((format!("rust/n{i}.md"), body));
    }
    for i in 0..5 {
        let body = if i == 0 {
            "Ownership of the allotment changed."
        } else {
            "Weekly shopping list."
        };
        files.push((format!("misc/m{i}.md"), body));
    }
    let files: Vec<(&str, &str)> =
        files.iter().map(|(p, b)| (p.as_str(), *b)).collect();
    write_vault(tempdir.path(), &files)?;

    let store = FsDocumentStore::open(tempdir.path())?;
    let retriever = Retriever::new(store, RetrievalConfig::default());
    let results = retriever.retrieve("ownership", &explained()).await;

    assert_eq!(results.len(), 4);
    for result in &results {
        let explanation = result.explanation.as_ref().ok_or("no explanation")?;
        if result.document_id().starts_with("rust/") {
            assert!(explanation.folder_boost.is_some_and(|f| f > 1.0));
        } else {
            assert_eq!(explanation.folder_boost, None);
        }
    }
    assert_eq!(results.last().map(RankedResult::document_id), Some("misc/m0.md"));
    Ok(())
}

#[tokio::test]
async fn edited_document_is_not_served_from_cache() -> TestResult {
    let tempdir = tempfile::tempdir()?;
    write_vault(
        tempdir.path(),
        &[("a.md", "Horses graze."), ("b.md", "Lions hunt.")],
    )?;
    let store = FsDocumentStore::open(tempdir.path())?;
    let retriever = Retriever::new(store, RetrievalConfig::default());
    let cancel = CancelToken::new();
    let options = RetrieveOptions::default();

    let before = retriever.try_retrieve("zebra", &options, &cancel).await?;
    assert!(before.results.is_empty());
    let repeated = retriever.try_retrieve("zebra", &options, &cancel).await?;
    assert!(repeated.cached);

    let path = tempdir.path().join("a.md");
    std::fs::write(&path, "Zebra stripes.")?;
    OpenOptions::new()
        .write(true)
        .open(&path)?
        .set_modified(SystemTime::now() + Duration::from_secs(60))?;

    let after = retriever.try_retrieve("zebra", &options, &cancel).await?;
    assert!(!after.cached);
    assert_eq!(documents(&after.results), vec!["a.md"]);
    Ok(())
}

#[tokio::test]
async fn linked_documents_get_graph_boost() -> TestResult {
    let tempdir = tempfile::tempdir()?;
    write_vault(
        tempdir.path(),
        &[
            ("a.md", "# Rust\n\nRust ownership, see [[b]]."),
            ("b.md", "# Borrowing\n\nRust borrowing rules."),
            ("c.md", "# Cats\n\nCats sleep."),
        ],
    )?;

    let store = FsDocumentStore::open(tempdir.path())?;
    let retriever = Retriever::new(store, RetrievalConfig::default());
    let results = retriever.retrieve("rust", &explained()).await;

    let boost = |document: &str| {
        results
            .iter()
            .find(|r| r.document_id() == document)
            .and_then(|r| r.explanation.as_ref())
            .and_then(|e| e.graph_boost)
    };
    assert!(boost("b.md").is_some_and(|f| f > 1.0));
    assert_eq!(boost("a.md"), None);
    assert!(results.iter().all(|r| r.document_id() != "c.md"));

    let unboosted = retriever
        .retrieve(
            "rust",
            &RetrieveOptions {
                enable_boosts: false,
                ..explained()
            },
        )
        .await;
    assert!(
        unboosted
            .iter()
            .filter_map(|r| r.explanation.as_ref())
            .all(|e| e.graph_boost.is_none() && e.folder_boost.is_none())
    );
    Ok(())
}

#[tokio::test]
async fn out_of_range_options_are_clamped() -> TestResult {
    let docs: Vec<(String, String)> = (0..20)
        .map(|i| (format!("d{i:02}.md"), "rank fusion".to_string()))
        .collect();
    let store: MemoryStore = docs
        .iter()
        .map(|(id, body)| Document::new(id.as_str(), body.as_str()))
        .collect();
    let retriever = Retriever::new(store, RetrievalConfig::default());
    let options = RetrieveOptions {
        max_results: 0,
        candidate_limit: 1,
        semantic_weight: 7.0,
        ..RetrieveOptions::default()
    };

    let outcome = retriever
        .try_retrieve("fusion", &options, &CancelToken::new())
        .await?;
    // max_results clamps to 1, candidate_limit to 10.
    assert_eq!(outcome.candidates, 10);
    assert_eq!(outcome.results.len(), 1);
    Ok(())
}

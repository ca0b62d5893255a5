use chunkrank::{
    CancelToken,
    Chunker,
    FsDocumentStore,
    LocalExpander,
    RankedResult,
    RetrievalConfig,
    RetrievalOutcome,
    RetrieveOptions,
    Retriever,
    config::CandidateFilter,
    document::DocumentStore,
    error::{self, Error},
    result::Explanation,
    text_util::{extract_snippet, indent},
};
use clap::Parser;
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{ChunksArgs, Cli, Command, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CHUNKRANK_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Search(args) => cmd_search(&args)?,
        Command::Chunks(args) => cmd_chunks(&args)?,
        Command::Completions(args) => args.generate(),
    }

    Ok(())
}

/// One result as printed by `search`.
#[derive(Debug, Serialize)]
struct ResultView {
    rank: usize,
    id: String,
    document: String,
    score: f64,
    title: String,
    heading: String,
    snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<Explanation>,
}

#[derive(Debug, Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    result_count: usize,
    candidates: usize,
    chunks_indexed: usize,
    degraded: bool,
    results: Vec<ResultView>,
}

fn cmd_search(args: &SearchArgs) -> error::Result<()> {
    let config = RetrievalConfig::resolve(args.config.as_deref())?;
    if !args.dir.is_dir() {
        return Err(Error::Config(format!(
            "not a directory: {}",
            args.dir.display()
        )));
    }
    let store = FsDocumentStore::open(&args.dir)?;
    let retriever = Retriever::new(store, config).with_expander(LocalExpander);

    let filter = if args.globs.is_empty() {
        None
    } else {
        Some(CandidateFilter::new(&args.globs)?)
    };
    let options = RetrieveOptions {
        max_results: args.count,
        candidate_limit: args.candidates,
        enable_boosts: !args.no_boosts,
        semantic_weight: args.semantic_weight,
        salient_terms: (!args.salient_terms.is_empty())
            .then(|| args.salient_terms.clone()),
        explain: args.explain,
        filter,
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(async {
        let cancel = CancelToken::new();
        match retriever.try_retrieve(&args.query, &options, &cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "search failed, matching file names instead");
                RetrievalOutcome {
                    results: retriever.fallback(&args.query, &options),
                    degraded: true,
                    ..RetrievalOutcome::default()
                }
            }
        }
    });

    let views: Vec<ResultView> = outcome
        .results
        .iter()
        .enumerate()
        .map(|(i, result)| view(&retriever, &outcome.scoring_terms, i + 1, result))
        .collect();

    if args.json {
        let output = SearchOutput {
            query: &args.query,
            result_count: views.len(),
            candidates: outcome.candidates,
            chunks_indexed: outcome.build.chunks,
            degraded: outcome.degraded,
            results: views,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        format_human(&views, args.explain);
    }
    Ok(())
}

fn view<S: DocumentStore>(
    retriever: &Retriever<S, LocalExpander>,
    terms: &[String],
    rank: usize,
    result: &RankedResult,
) -> ResultView {
    let chunk = match retriever.chunk(&result.id) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(id = %result.id, error = %e, "could not load chunk text");
            None
        }
    };
    let (title, heading, snippet) = match chunk {
        Some(chunk) => {
            let snippet = extract_snippet(&chunk.content, terms)
                .map(|(text, _)| text)
                .unwrap_or_default();
            (chunk.title, chunk.heading, snippet)
        }
        None => Default::default(),
    };

    ResultView {
        rank,
        id: result.id.clone(),
        document: result.document_id().to_string(),
        score: result.score,
        title,
        heading,
        snippet,
        explanation: result.explanation.clone(),
    }
}

fn format_human(results: &[ResultView], explain: bool) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in results {
        println!("{:>3}. [{:.3}] {}", r.rank, r.score, r.id);
        match (r.title.is_empty(), r.heading.is_empty()) {
            (false, false) if r.title != r.heading => {
                println!("     {} > {}", r.title, r.heading)
            }
            (false, _) => println!("     {}", r.title),
            (true, false) => println!("     {}", r.heading),
            (true, true) => {}
        }
        if !r.snippet.is_empty() {
            println!("{}", indent(&r.snippet, 5));
        }
        if explain && let Some(explanation) = &r.explanation {
            print_explanation(explanation);
        }
        println!();
    }
    println!("{} result(s)", results.len());
}

fn print_explanation(explanation: &Explanation) {
    for m in &explanation.lexical_matches {
        println!(
            "       {:<16} {:<24} +{:.3}",
            m.field.name(),
            m.query,
            m.weight
        );
    }
    if let Some(boost) = explanation.expanded_boost {
        println!("       expanded terms   +{boost:.3}");
    }
    if let Some(factor) = explanation.folder_boost {
        println!("       folder boost     x{factor:.3}");
    }
    if let Some(factor) = explanation.graph_boost {
        println!("       graph boost      x{factor:.3}");
    }
    println!(
        "       base {:.4} -> final {:.4}",
        explanation.base_score, explanation.final_score
    );
}

fn cmd_chunks(args: &ChunksArgs) -> error::Result<()> {
    let mut config = RetrievalConfig::resolve(args.config.as_deref())?.chunking;
    if let Some(max_chars) = args.max_chars {
        config.max_chars = max_chars.max(1);
    }
    if let Some(overlap) = args.overlap {
        config.overlap = overlap;
    }

    let (Some(parent), Some(name)) = (
        args.file.parent(),
        args.file.file_name().and_then(|n| n.to_str()),
    ) else {
        return Err(Error::Config(format!(
            "not a file: {}",
            args.file.display()
        )));
    };
    let parent = if parent.as_os_str().is_empty() {
        std::path::Path::new(".")
    } else {
        parent
    };

    let store = FsDocumentStore::open(parent)?;
    let document = store.get_document(name)?.ok_or_else(|| Error::NotFound {
        kind: "file",
        name: args.file.display().to_string(),
    })?;
    let chunks = Chunker::new(config).chunk(&document);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    for chunk in &chunks {
        let end = chunk.start_offset + chunk.own_text().len();
        let mut flags = String::new();
        if chunk.overlap_len > 0 {
            flags.push_str(&format!(" overlap={}", chunk.overlap_len));
        }
        if chunk.oversized {
            flags.push_str(" oversized");
        }
        println!(
            "{} [bytes {}..{}]{} {}",
            chunk.id, chunk.start_offset, end, flags, chunk.heading
        );
        println!("{}", indent(&chunk.content, 4));
        println!();
    }
    println!("{} chunk(s)", chunks.len());
    Ok(())
}

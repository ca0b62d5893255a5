use std::path::PathBuf;

use chunkrank::{
    budget::DEFAULT_CANDIDATE_LIMIT,
    config::{DEFAULT_MAX_RESULTS, DEFAULT_SEMANTIC_WEIGHT},
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "chunkrank",
    about = "Rank the chunks of a markdown folder against a query"
)]
pub struct Cli {
    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search a folder of documents
    Search(SearchArgs),
    /// Show how a file is split into chunks
    Chunks(ChunksArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Folder to search
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Maximum number of results (1-100)
    #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_RESULTS)]
    pub count: usize,

    /// Maximum number of documents to index
    #[arg(long, default_value_t = DEFAULT_CANDIDATE_LIMIT)]
    pub candidates: usize,

    /// Disable folder and link-graph boosts
    #[arg(long)]
    pub no_boosts: bool,

    /// Semantic share of the fusion weights (0-1)
    #[arg(long, default_value_t = DEFAULT_SEMANTIC_WEIGHT)]
    pub semantic_weight: f64,

    /// Scoring term to use instead of those extracted from the query
    #[arg(long = "salient", value_name = "TERM")]
    pub salient_terms: Vec<String>,

    /// Only consider documents whose path matches this glob (repeatable)
    #[arg(long = "glob", value_name = "PATTERN")]
    pub globs: Vec<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Show how each score was computed
    #[arg(long)]
    pub explain: bool,

    /// Configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

// -- Chunks --

#[derive(Debug, Parser)]
pub struct ChunksArgs {
    /// The file to chunk
    pub file: PathBuf,

    /// Maximum chunk size in characters
    #[arg(long)]
    pub max_chars: Option<usize>,

    /// Characters carried over from the previous chunk
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Output chunks as JSON
    #[arg(long)]
    pub json: bool,

    /// Configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "chunkrank",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["chunkrank", "search", "hello"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "hello");
                assert_eq!(args.dir, PathBuf::from("."));
                assert_eq!(args.count, 30);
                assert_eq!(args.candidates, 500);
                assert_eq!(args.semantic_weight, 0.6);
                assert!(!args.no_boosts);
                assert!(args.salient_terms.is_empty());
                assert!(args.globs.is_empty());
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_repeated_flags() {
        let cli = Cli::parse_from([
            "chunkrank", "-vv", "search", "q", "--salient", "a", "--salient",
            "b", "--glob", "notes/**", "--no-boosts",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.salient_terms, vec!["a", "b"]);
                assert_eq!(args.globs, vec!["notes/**"]);
                assert!(args.no_boosts);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_chunks() {
        let cli = Cli::parse_from([
            "chunkrank", "chunks", "note.md", "--max-chars", "200", "--json",
        ]);
        match cli.command {
            Command::Chunks(args) => {
                assert_eq!(args.file, PathBuf::from("note.md"));
                assert_eq!(args.max_chars, Some(200));
                assert_eq!(args.overlap, None);
                assert!(args.json);
            }
            _ => panic!("expected chunks command"),
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}

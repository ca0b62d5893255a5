//! chunkrank - per-query chunk retrieval and ranking for document folders.
//!
//! Every query builds a small, memory-bounded lexical index over the
//! candidate documents, ranks their heading-aware chunks across weighted
//! metadata fields, fuses that ranking with an optional semantic one,
//! applies folder and link-graph boosts, normalizes the scores and cuts the
//! list where relevance drops off. Nothing is persisted between queries
//! except a chunk cache keyed by modification time.
//!
//! # Quick start
//!
//! ```no_run
//! use chunkrank::{FsDocumentStore, RetrievalConfig, RetrieveOptions, Retriever};
//!
//! # async fn run() -> chunkrank::Result<()> {
//! let store = FsDocumentStore::open("notes".as_ref())?;
//! let config = RetrievalConfig::resolve(None)?;
//! let retriever = Retriever::new(store, config);
//!
//! let results = retriever
//!     .retrieve("borrow checker", &RetrieveOptions::default())
//!     .await;
//! for r in &results {
//!     println!("{} (score: {:.3})", r.id, r.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod boost;
pub mod budget;
pub mod cancel;
pub mod chunk_id;
pub mod chunking;
pub mod config;
pub mod cutoff;
pub mod document;
pub mod error;
pub mod expansion;
pub mod frontmatter;
pub mod fs_store;
pub mod fusion;
pub mod lexical_index;
pub mod normalize;
pub mod pipeline;
pub mod result;
pub mod semantic;
pub mod text_util;
pub mod tokenizer;

pub use cancel::CancelToken;
pub use chunking::{Chunk, Chunker, ChunkingConfig};
pub use config::{RetrievalConfig, RetrieveOptions};
pub use document::{Document, DocumentStore, MemoryStore};
pub use error::{Error, Result};
pub use expansion::{ExpandedQuery, LocalExpander, NoExpansion, QueryExpander};
pub use fs_store::FsDocumentStore;
pub use pipeline::{RetrievalOutcome, Retriever};
pub use result::{Explanation, RankedResult, SourceEngine};
pub use semantic::{NoSemanticIndex, SemanticIndex};

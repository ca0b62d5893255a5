//! Heading-aware chunking of documents into size-capped fragments.
//!
//! A document body (minus front-matter) is split into blocks: heading lines,
//! blank-line separated paragraphs and fenced code blocks. Blocks accumulate
//! into a chunk until the next one would push it past `max_chars`; a heading
//! always opens a new chunk, and every chunk remembers the heading of the
//! section it came from.
//!
//! Chunks are contiguous slices of the body, so concatenating their own text
//! (see [`Chunk::own_text`]) reproduces the body exactly.

use std::{collections::BTreeMap, sync::Arc};

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    chunk_id::ChunkId,
    document::{Document, DocumentStore, PropertyValue, basename},
    error::{Error, Result},
    frontmatter::{self, FlatProperty},
};

/// Default chunk size in characters.
pub const DEFAULT_MAX_CHARS: usize = 1000;

/// Default overlap between chunks in characters (0 to minimize chunk count).
pub const DEFAULT_CHUNK_OVERLAP: usize = 0;

/// Default size of the chunk cache in bytes (32 MiB).
pub const DEFAULT_CACHE_BYTES: u64 = 32 * 1024 * 1024;

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use chunkrank::chunking::{ChunkingConfig, DEFAULT_MAX_CHARS};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.max_chars, DEFAULT_MAX_CHARS);
/// assert_eq!(config.overlap, 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters, excluding overlap.
    pub max_chars: usize,
    /// Characters of the previous chunk repeated at the start of the next.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A size-bounded, heading-aware fragment of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// `"{document_id}#{index}"`.
    pub id: String,
    pub document_id: String,
    /// Zero-based chunk index within the document.
    pub index: u32,
    /// Chunk text, including any overlap prefix.
    pub content: String,
    pub title: String,
    /// Heading of the section this chunk belongs to; empty before the first
    /// heading.
    pub heading: String,
    pub modified_at: u64,
    /// Byte offset of the chunk's own text in the front-matter-free body.
    pub start_offset: usize,
    /// Byte length of the overlap prefix at the start of `content`.
    pub overlap_len: usize,
    /// A fenced code block longer than `max_chars`, emitted whole.
    pub oversized: bool,
}

impl Chunk {
    /// The chunk's text without the overlap prefix.
    pub fn own_text(&self) -> &str {
        &self.content[self.overlap_len..]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BlockKind {
    Heading(String),
    Paragraph,
    Code,
}

#[derive(Debug, Clone)]
struct Block {
    start: usize,
    end: usize,
    kind: BlockKind,
}

#[derive(Debug, Clone)]
struct Piece {
    start: usize,
    end: usize,
    heading: String,
    oversized: bool,
}

/// Splits documents into [`Chunk`]s.
///
/// # Examples
///
/// ```
/// use chunkrank::{
///     chunking::{Chunker, ChunkingConfig},
///     document::Document,
/// };
///
/// let chunker = Chunker::new(ChunkingConfig::default());
/// let doc = Document::new("note.md", "# Intro\nHello there.\n");
/// let chunks = chunker.chunk(&doc);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].id, "note.md#0");
/// assert_eq!(chunks[0].heading, "Intro");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config: ChunkingConfig {
                max_chars: config.max_chars.max(1),
                overlap: config.overlap,
            },
        }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Chunk a document. Front-matter is excluded; empty or whitespace-only
    /// bodies produce no chunks.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let body = frontmatter::split(&document.body).body;
        self.chunk_body(document, body)
    }

    fn chunk_body(&self, document: &Document, body: &str) -> Vec<Chunk> {
        if body.trim().is_empty() {
            return Vec::new();
        }

        let pieces = self.assemble(body, &parse_blocks(body));
        let title = if document.title.is_empty() {
            basename(&document.id).to_string()
        } else {
            document.title.clone()
        };

        let mut chunks: Vec<Chunk> = Vec::with_capacity(pieces.len());
        for (index, piece) in pieces.into_iter().enumerate() {
            let own = &body[piece.start..piece.end];
            let prefix = match chunks.last() {
                Some(prev) if self.config.overlap > 0 => {
                    tail_chars(prev.own_text(), self.config.overlap)
                }
                _ => "",
            };
            let index = index as u32;
            chunks.push(Chunk {
                id: ChunkId::new(&document.id, index).to_string(),
                document_id: document.id.clone(),
                index,
                content: format!("{prefix}{own}"),
                title: title.clone(),
                heading: piece.heading,
                modified_at: document.modified_at,
                start_offset: piece.start,
                overlap_len: prefix.len(),
                oversized: piece.oversized,
            });
        }
        chunks
    }

    fn assemble(&self, body: &str, blocks: &[Block]) -> Vec<Piece> {
        let max = self.config.max_chars;
        let mut pieces: Vec<Piece> = Vec::new();
        let mut current: Option<(Piece, usize)> = None;
        let mut heading = String::new();

        for block in blocks {
            if let BlockKind::Heading(text) = &block.kind {
                if let Some((piece, _)) = current.take() {
                    pieces.push(piece);
                }
                heading = text.clone();
            }

            let len = body[block.start..block.end].chars().count();
            if let Some((_, current_len)) = &current
                && current_len + len > max
                && let Some((piece, _)) = current.take()
            {
                pieces.push(piece);
            }

            if len > max {
                if let Some((piece, _)) = current.take() {
                    pieces.push(piece);
                }
                if block.kind == BlockKind::Code {
                    pieces.push(Piece {
                        start: block.start,
                        end: block.end,
                        heading: heading.clone(),
                        oversized: true,
                    });
                } else {
                    for (start, end) in
                        split_long(body, block.start, block.end, max)
                    {
                        pieces.push(Piece {
                            start,
                            end,
                            heading: heading.clone(),
                            oversized: false,
                        });
                    }
                }
                continue;
            }

            match &mut current {
                Some((piece, current_len)) => {
                    piece.end = block.end;
                    *current_len += len;
                }
                None => {
                    current = Some((
                        Piece {
                            start: block.start,
                            end: block.end,
                            heading: heading.clone(),
                            oversized: false,
                        },
                        len,
                    ));
                }
            }
        }
        if let Some((piece, _)) = current {
            pieces.push(piece);
        }

        merge_blank_pieces(body, pieces, max)
    }
}

/// Fold runs of whitespace-only pieces into their neighbours so no chunk is
/// blank, keeping every piece that is not oversized within `max` characters.
fn merge_blank_pieces(body: &str, pieces: Vec<Piece>, max: usize) -> Vec<Piece> {
    let mut merged: Vec<Piece> = Vec::with_capacity(pieces.len());
    let mut blank: Option<Piece> = None;

    for mut piece in pieces {
        if body[piece.start..piece.end].trim().is_empty() {
            match &mut blank {
                Some(run) => run.end = piece.end,
                None => blank = Some(piece),
            }
            continue;
        }
        if let Some(run) = blank.take() {
            let rest =
                spread_blank(body, run, merged.last_mut(), Some(&mut piece), max);
            merged.extend(rest);
        }
        merged.push(piece);
    }
    if let Some(run) = blank {
        let rest = spread_blank(body, run, merged.last_mut(), None, max);
        merged.extend(rest);
    }
    merged
}

/// Attach a whitespace-only run to the end of `prev` and the start of
/// `next` as far as each has room. What fits in neither comes back as
/// whitespace-only pieces of at most `max` characters.
fn spread_blank(
    body: &str,
    mut run: Piece,
    prev: Option<&mut Piece>,
    next: Option<&mut Piece>,
    max: usize,
) -> Vec<Piece> {
    if let Some(prev) = prev {
        let taken = byte_offset(&body[run.start..run.end], room(body, prev, max));
        prev.end = run.start + taken;
        run.start = prev.end;
    }
    if let Some(next) = next
        && run.start < run.end
    {
        let text = &body[run.start..run.end];
        let keep = text.chars().count().saturating_sub(room(body, next, max));
        next.start = run.start + byte_offset(text, keep);
        run.end = next.start;
    }

    let mut rest = Vec::new();
    while run.start < run.end {
        let end = run.start + byte_offset(&body[run.start..run.end], max);
        rest.push(Piece {
            start: run.start,
            end,
            heading: run.heading.clone(),
            oversized: false,
        });
        run.start = end;
    }
    rest
}

/// Characters `piece` can still take before reaching `max`. Oversized
/// pieces are unbounded.
fn room(body: &str, piece: &Piece, max: usize) -> usize {
    if piece.oversized {
        return usize::MAX;
    }
    max.saturating_sub(body[piece.start..piece.end].chars().count())
}

/// Byte offset just past the first `n` characters of `text`.
fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map_or(text.len(), |(i, _)| i)
}

fn parse_blocks(body: &str) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut offset = 0;
    let mut paragraph_open = false;
    let mut fence: Option<(char, usize)> = None;

    for line in body.split_inclusive('\n') {
        let start = offset;
        let end = offset + line.len();
        offset = end;

        if let Some((fence_char, fence_len)) = fence {
            if let Some(block) = blocks.last_mut() {
                block.end = end;
            }
            if is_fence_close(line, fence_char, fence_len) {
                fence = None;
            }
            continue;
        }

        if line.trim().is_empty() {
            // Blank lines after a closed fence stay out of the code block.
            match blocks.last_mut() {
                Some(block) if block.kind != BlockKind::Code => block.end = end,
                _ => blocks.push(Block {
                    start,
                    end,
                    kind: BlockKind::Paragraph,
                }),
            }
            paragraph_open = false;
            continue;
        }

        if let Some(opened) = fence_open(line) {
            fence = Some(opened);
            blocks.push(Block {
                start,
                end,
                kind: BlockKind::Code,
            });
            paragraph_open = false;
            continue;
        }

        if let Some(text) = heading_text(line) {
            blocks.push(Block {
                start,
                end,
                kind: BlockKind::Heading(text),
            });
            paragraph_open = false;
            continue;
        }

        match blocks.last_mut() {
            Some(block)
                if paragraph_open && block.kind == BlockKind::Paragraph =>
            {
                block.end = end;
            }
            _ => blocks.push(Block {
                start,
                end,
                kind: BlockKind::Paragraph,
            }),
        }
        paragraph_open = true;
    }

    fold_leading_blank(body, blocks)
}

/// Leading blank lines become part of the first real block.
fn fold_leading_blank(body: &str, mut blocks: Vec<Block>) -> Vec<Block> {
    if blocks.len() > 1 && body[blocks[0].start..blocks[0].end].trim().is_empty()
    {
        let leading = blocks.remove(0);
        blocks[0].start = leading.start;
    }
    blocks
}

fn fence_open(line: &str) -> Option<(char, usize)> {
    let trimmed = strip_indent(line)?;
    let fence_char = trimmed.chars().next()?;
    if fence_char != '`' && fence_char != '~' {
        return None;
    }
    let fence_len = trimmed.chars().take_while(|&c| c == fence_char).count();
    (fence_len >= 3).then_some((fence_char, fence_len))
}

fn is_fence_close(line: &str, fence_char: char, fence_len: usize) -> bool {
    let Some(trimmed) = strip_indent(line) else {
        return false;
    };
    let run = trimmed.chars().take_while(|&c| c == fence_char).count();
    run >= fence_len && trimmed[run * fence_char.len_utf8()..].trim().is_empty()
}

/// Strip up to three spaces of indentation; more makes an indented block.
fn strip_indent(line: &str) -> Option<&str> {
    let spaces = line.chars().take_while(|&c| c == ' ').count();
    (spaces <= 3).then(|| &line[spaces..])
}

/// Text of an ATX heading line (`# Title`), without the markers.
fn heading_text(line: &str) -> Option<String> {
    let trimmed = strip_indent(line)?.trim_end();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }
    Some(rest.trim().trim_end_matches('#').trim_end().to_string())
}

/// Split `body[start..end]` into ranges of at most `max` characters,
/// breaking after the last whitespace in each window when there is one.
fn split_long(
    body: &str,
    start: usize,
    end: usize,
    max: usize,
) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let window = &body[cursor..end];
        let Some((limit, _)) = window.char_indices().nth(max) else {
            ranges.push((cursor, end));
            break;
        };

        let cut = window[..limit]
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .filter(|&i| i > 0 && !window[..i].trim().is_empty())
            .unwrap_or(limit);

        ranges.push((cursor, cursor + cut));
        cursor += cut;
    }

    ranges
}

/// The last `n` characters of `text`.
fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if n >= count {
        return text;
    }
    let skip = count - n;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[start..]
}

/// Truncate `text` to at most `limit` bytes on a char boundary.
pub fn truncate_at_char_boundary(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Per-document field values shared by every chunk of the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFields {
    pub title: String,
    /// Folder names and file stem, space separated.
    pub path: String,
    pub tags: Vec<String>,
    pub properties: Vec<FlatProperty>,
    /// Basenames of outgoing links.
    pub links: Vec<String>,
}

impl DocumentFields {
    fn extract(
        document: &Document,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Self {
        let title = if document.title.is_empty() {
            basename(&document.id).to_string()
        } else {
            document.title.clone()
        };

        let mut components: Vec<&str> = document
            .id
            .split('/')
            .filter(|part| !part.is_empty())
            .collect();
        if let Some(last) = components.last_mut() {
            *last = basename(last);
        }

        let mut tags: Vec<String> = document
            .tags
            .iter()
            .map(|t| t.trim_start_matches('#').to_string())
            .chain(frontmatter::declared_tags(properties))
            .filter(|t| !t.is_empty())
            .collect();
        tags.sort();
        tags.dedup();

        let mut links: Vec<String> = document
            .out_links
            .iter()
            .map(|link| basename(link).to_string())
            .collect();
        links.sort();
        links.dedup();

        Self {
            title,
            path: components.join(" "),
            tags,
            properties: frontmatter::flatten(properties),
            links,
        }
    }

    fn weight(&self) -> usize {
        self.title.len()
            + self.path.len()
            + self.tags.iter().map(String::len).sum::<usize>()
            + self
                .properties
                .iter()
                .map(|p| p.key.len() + p.text.len())
                .sum::<usize>()
            + self.links.iter().map(String::len).sum::<usize>()
    }
}

/// A document reduced to what the lexical index needs: its chunks and the
/// metadata fields replicated into each of them.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDocument {
    pub document_id: String,
    pub modified_at: u64,
    pub fields: DocumentFields,
    pub chunks: Vec<Chunk>,
    /// The body exceeded the size limit and was truncated.
    pub truncated: bool,
}

impl PreparedDocument {
    /// Chunk a document and extract its metadata fields.
    ///
    /// Bodies larger than `max_document_bytes` are truncated on a char
    /// boundary. Front-matter is parsed only when the store did not already
    /// supply properties; a malformed block is logged and ignored.
    pub fn prepare(
        document: &Document,
        chunker: &Chunker,
        max_document_bytes: usize,
    ) -> Self {
        let split = frontmatter::split(&document.body);

        let parsed;
        let properties = if document.properties.is_empty() {
            parsed = match split.yaml.map(frontmatter::parse_properties) {
                Some(Ok(props)) => props,
                Some(Err(e)) => {
                    warn!(id = %document.id, error = %e, "ignoring malformed front-matter");
                    BTreeMap::new()
                }
                None => BTreeMap::new(),
            };
            &parsed
        } else {
            &document.properties
        };

        let body = truncate_at_char_boundary(split.body, max_document_bytes);
        let truncated = body.len() < split.body.len();
        if truncated {
            let e = Error::ContentTooLarge {
                id: document.id.clone(),
                bytes: split.body.len(),
                limit: max_document_bytes,
            };
            warn!(error = %e, "truncating document body");
        }

        Self {
            document_id: document.id.clone(),
            modified_at: document.modified_at,
            fields: DocumentFields::extract(document, properties),
            chunks: chunker.chunk_body(document, body),
            truncated,
        }
    }

    /// Approximate heap size in bytes.
    pub fn weight(&self) -> usize {
        self.fields.weight()
            + self
                .chunks
                .iter()
                .map(|c| c.content.len() + c.id.len() + c.heading.len())
                .sum::<usize>()
    }
}

/// Bounded cache of prepared documents keyed by document id.
///
/// An entry is only returned when its modification time matches the one
/// requested, so a changed document is re-chunked on its next use.
#[derive(Clone)]
pub struct ChunkCache {
    cache: Cache<String, Arc<PreparedDocument>>,
}

impl ChunkCache {
    pub fn new(max_bytes: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_id: &String, doc: &Arc<PreparedDocument>| {
                u32::try_from(doc.weight()).unwrap_or(u32::MAX)
            })
            .build();
        Self { cache }
    }

    pub fn get(
        &self,
        document_id: &str,
        modified_at: u64,
    ) -> Option<Arc<PreparedDocument>> {
        self.cache
            .get(document_id)
            .filter(|doc| doc.modified_at == modified_at)
    }

    /// Load a document's prepared form, from cache when its mtime matches.
    pub fn get_or_prepare(
        &self,
        store: &dyn DocumentStore,
        chunker: &Chunker,
        max_document_bytes: usize,
        document_id: &str,
    ) -> Result<Arc<PreparedDocument>> {
        let not_found = || Error::NotFound {
            kind: "document",
            name: document_id.to_string(),
        };

        let modified_at = store.modified_at(document_id)?.ok_or_else(not_found)?;
        if let Some(prepared) = self.get(document_id, modified_at) {
            return Ok(prepared);
        }

        let document = store.get_document(document_id)?.ok_or_else(not_found)?;
        let prepared = Arc::new(PreparedDocument::prepare(
            &document,
            chunker,
            max_document_bytes,
        ));
        self.insert(prepared.clone());
        Ok(prepared)
    }

    pub fn insert(&self, prepared: Arc<PreparedDocument>) {
        self.cache.insert(prepared.document_id.clone(), prepared);
    }

    pub fn invalidate(&self, document_id: &str) {
        self.cache.invalidate(document_id);
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}

impl std::fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCache").finish_non_exhaustive()
    }
}

//! Single-pass tokenizer for Latin-script words and CJK text.
//!
//! Alphanumeric runs become lowercase word tokens. CJK characters have no
//! word separators, so each one is emitted as a unigram and, when it follows
//! another CJK character, as a bigram too. Queries use bigrams only (or the
//! lone unigram of a one-character run) so a multi-character CJK query must
//! match adjacent characters.

use tantivy::tokenizer::{Token, TokenStream, Tokenizer};

/// Name under which the tokenizer is registered with tantivy.
pub const TOKENIZER_NAME: &str = "chunkrank";

/// Word tokens longer than this (in chars) are dropped.
pub const MAX_TOKEN_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMode {
    Index,
    Query,
}

/// Whether `c` belongs to a script written without spaces.
pub fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x309F
            | 0x30A0..=0x30FF
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xAC00..=0xD7AF
            | 0xF900..=0xFAFF
    )
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Tokenize `text`, returning tantivy tokens with byte offsets.
pub fn tokenize(text: &str, mode: TokenMode) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;
    let mut cjk_run: Vec<(usize, char)> = Vec::new();

    let flush_word =
        |tokens: &mut Vec<Token>, start: &mut Option<usize>, end: usize| {
            if let Some(from) = start.take() {
                let word = &text[from..end];
                if word.chars().count() <= MAX_TOKEN_CHARS {
                    push_token(tokens, from, end, word.to_lowercase());
                }
            }
        };

    for (offset, c) in text.char_indices() {
        if is_cjk(c) {
            flush_word(&mut tokens, &mut word_start, offset);
            cjk_run.push((offset, c));
            continue;
        }
        flush_cjk(&mut tokens, &mut cjk_run, mode);
        if is_word_char(c) {
            word_start.get_or_insert(offset);
        } else {
            flush_word(&mut tokens, &mut word_start, offset);
        }
    }
    flush_word(&mut tokens, &mut word_start, text.len());
    flush_cjk(&mut tokens, &mut cjk_run, mode);

    tokens
}

fn push_token(tokens: &mut Vec<Token>, from: usize, to: usize, text: String) {
    let position = tokens.len();
    tokens.push(Token {
        offset_from: from,
        offset_to: to,
        position,
        text,
        position_length: 1,
    });
}

fn flush_cjk(
    tokens: &mut Vec<Token>,
    run: &mut Vec<(usize, char)>,
    mode: TokenMode,
) {
    if run.is_empty() {
        return;
    }
    let emit_unigrams = mode == TokenMode::Index || run.len() == 1;
    for (i, &(offset, c)) in run.iter().enumerate() {
        if emit_unigrams {
            push_token(tokens, offset, offset + c.len_utf8(), c.to_string());
        }
        if let Some(&(next_offset, next)) = run.get(i + 1) {
            let end = next_offset + next.len_utf8();
            push_token(tokens, offset, end, [c, next].iter().collect());
        }
    }
    run.clear();
}

/// Distinct token texts of a query, in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(query, TokenMode::Query) {
        if !terms.contains(&token.text) {
            terms.push(token.text);
        }
    }
    terms
}

/// The tantivy-facing tokenizer; always runs in [`TokenMode::Index`].
#[derive(Debug, Clone, Default)]
pub struct ChunkTokenizer;

pub struct ChunkTokenStream {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Tokenizer for ChunkTokenizer {
    type TokenStream<'a> = ChunkTokenStream;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> ChunkTokenStream {
        ChunkTokenStream {
            tokens: tokenize(text, TokenMode::Index),
            cursor: 0,
        }
    }
}

impl TokenStream for ChunkTokenStream {
    fn advance(&mut self) -> bool {
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn token(&self) -> &Token {
        &self.tokens[self.cursor - 1]
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.tokens[self.cursor - 1]
    }
}

//! Token-budgeted document chunking with source attribution.

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use studyforge_core::{SourceDocument, Tokenizer};

/// Budgets below this could not fit a single multi-byte character.
const MIN_CHUNK_TOKENS: usize = 8;

/// Upper bound on bytes per token, used to cap how much text each boundary
/// search looks at.
const MAX_BYTES_PER_TOKEN: usize = 32;

/// Where one source file landed in the joined text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub filename: String,
    pub range: Range<usize>,
}

/// Several uploaded files joined into one text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinedDocument {
    /// Course material, each file introduced by a header line.
    pub text: String,
    pub spans: Vec<SourceSpan>,
    /// Past-exam files, kept out of `text` and attached to every prompt.
    pub past_exam_text: String,
}

/// One window of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub token_count: usize,
    /// Byte range in the chunked text.
    pub range: Range<usize>,
    /// Files overlapping this chunk, in document order.
    pub sources: Vec<String>,
}

/// Join uploaded files into one document.
///
/// Regular files are concatenated into `text` under a `=== File: name ===`
/// header. Past-exam files go to `past_exam_text` with the same header.
pub fn join_sources(sources: &[SourceDocument]) -> JoinedDocument {
    let mut doc = JoinedDocument::default();
    for source in sources {
        let body = source.text.trim();
        if body.is_empty() {
            continue;
        }
        let section = format!("=== File: {} ===\n{}\n\n", source.filename, body);
        if source.is_past_exam {
            doc.past_exam_text.push_str(&section);
        } else {
            let start = doc.text.len();
            doc.text.push_str(&section);
            doc.spans.push(SourceSpan {
                filename: source.filename.clone(),
                range: start..doc.text.len(),
            });
        }
    }
    doc
}

/// Splits text into ordered, non-overlapping windows under a token budget.
#[derive(Clone)]
pub struct DocumentChunker {
    tokenizer: Arc<dyn Tokenizer>,
    max_tokens: usize,
}

impl DocumentChunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, max_tokens: usize) -> Self {
        Self {
            tokenizer,
            max_tokens: max_tokens.max(MIN_CHUNK_TOKENS),
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Split `text` into chunks.
    ///
    /// Concatenating the chunk texts reproduces `text`. Each chunk ends after
    /// a whitespace character when one fits; a single word longer than the
    /// budget is split between characters. Blank input yields exactly one
    /// empty chunk.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return vec![Chunk {
                index: 0,
                text: String::new(),
                token_count: 0,
                range: 0..0,
                sources: Vec::new(),
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let end = start + self.next_boundary(&text[start..]);
            let piece = &text[start..end];
            chunks.push(Chunk {
                index: chunks.len(),
                text: piece.to_string(),
                token_count: self.tokenizer.count_tokens(piece),
                range: start..end,
                sources: Vec::new(),
            });
            start = end;
        }

        debug!(
            subsystem = "jobs",
            component = "chunker",
            tokenizer = self.tokenizer.name(),
            max_tokens = self.max_tokens,
            chunk_count = chunks.len(),
            text_len = text.len(),
            "Document chunked"
        );
        chunks
    }

    /// Chunk a joined document and attribute each chunk to its source files.
    pub fn chunk_document(&self, doc: &JoinedDocument) -> Vec<Chunk> {
        let mut chunks = self.chunk(&doc.text);
        for chunk in &mut chunks {
            chunk.sources = doc
                .spans
                .iter()
                .filter(|span| span.range.start < chunk.range.end && chunk.range.start < span.range.end)
                .map(|span| span.filename.clone())
                .collect();
        }
        chunks
    }

    /// Byte length of the next chunk taken from the front of `rest`.
    fn next_boundary(&self, rest: &str) -> usize {
        let window = floor_char_boundary(rest, self.max_tokens.saturating_mul(MAX_BYTES_PER_TOKEN));
        let fitting = self.tokenizer.truncate_to_tokens(&rest[..window], self.max_tokens);

        if fitting.len() == rest.len() {
            return rest.len();
        }
        if fitting.is_empty() {
            // Budget smaller than one character: emit the character anyway.
            return rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        match fitting.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            Some((i, c)) => i + c.len_utf8(),
            None => fitting.len(),
        }
    }
}

/// Largest char boundary in `text` at or below `index`.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

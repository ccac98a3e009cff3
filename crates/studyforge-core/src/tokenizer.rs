//! Token counting for prompt budgeting.
//!
//! Chunking and prompt truncation depend only on [`Tokenizer::count_tokens`],
//! so tests can swap in the deterministic [`EstimatingTokenizer`] while the
//! worker uses a tiktoken vocabulary matching the chat model.

use crate::error::{Error, Result};

/// Counts tokens the way the chat model will.
pub trait Tokenizer: Send + Sync {
    /// Number of tokens in `text`.
    fn count_tokens(&self, text: &str) -> usize;

    /// Identifier of the vocabulary in use.
    fn name(&self) -> &str;

    /// Longest prefix of `text` that fits in `max_tokens`.
    ///
    /// Always cuts on a char boundary. Returns `text` unchanged when it
    /// already fits.
    fn truncate_to_tokens<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str {
        if self.count_tokens(text) <= max_tokens {
            return text;
        }
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        // Largest boundary index whose prefix fits.
        let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.count_tokens(&text[..boundaries[mid]]) <= max_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        &text[..boundaries[lo]]
    }
}

/// Tiktoken-backed tokenizer.
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
    name: String,
}

impl TiktokenTokenizer {
    /// Tokenizer for a named OpenAI model (e.g. "gpt-4o-mini").
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| Error::Config(format!("No tokenizer for model {model}: {e}")))?;
        Ok(Self {
            bpe,
            name: model.to_string(),
        })
    }

    /// The cl100k_base vocabulary.
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::Internal(format!("Failed to initialize cl100k_base: {e}")))?;
        Ok(Self {
            bpe,
            name: "cl100k_base".to_string(),
        })
    }

    /// Model tokenizer, falling back to cl100k_base for unknown model names.
    pub fn for_model_or_default(model: &str) -> Result<Self> {
        match Self::for_model(model) {
            Ok(t) => Ok(t),
            Err(e) => {
                tracing::debug!(
                    subsystem = "core",
                    component = "tokenizer",
                    model,
                    error = %e,
                    "Falling back to cl100k_base"
                );
                Self::cl100k()
            }
        }
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Heuristic tokenizer: ~3.7 bytes per token.
///
/// Deterministic and vocabulary-free; used in tests and as a budget guard
/// where an exact count is not worth the cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingTokenizer;

impl Tokenizer for EstimatingTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    fn name(&self) -> &str {
        "estimate"
    }
}

/// Quick token estimate, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f32 / 3.7).ceil() as usize
}

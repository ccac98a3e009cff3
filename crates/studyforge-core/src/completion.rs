//! Completion provider request and response types.
//!
//! These are the normalized shapes exchanged with a [`CompletionProvider`]:
//! content parts in, message plus token/cost data out. Provider-specific wire
//! formats stay inside the backend crate.
//!
//! [`CompletionProvider`]: crate::traits::CompletionProvider

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{TokenUsage, UsageReport};

// =============================================================================
// REQUEST
// =============================================================================

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Image by URL or inline `data:` URI.
    ImageUrl { url: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl { url: url.into() }
    }

    /// Inline image from base64 data.
    pub fn inline_image(mime_type: &str, data_base64: &str) -> Self {
        ContentPart::ImageUrl {
            url: format!("data:{mime_type};base64,{data_base64}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|p| matches!(p, ContentPart::ImageUrl { .. }))
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider's default chat model.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.messages
            .push(ChatMessage::new(ChatRole::System, vec![ContentPart::text(text)]));
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.messages
            .push(ChatMessage::new(ChatRole::User, vec![ContentPart::text(text)]));
        self
    }

    pub fn user_parts(mut self, parts: Vec<ContentPart>) -> Self {
        self.messages.push(ChatMessage::new(ChatRole::User, parts));
        self
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn has_image(&self) -> bool {
        self.messages.iter().any(ChatMessage::has_image)
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

/// A normalized completion with cost data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub message: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
}

impl Completion {
    /// Usage report for one priced call.
    pub fn usage_report(&self, feature: &str) -> UsageReport {
        UsageReport::new(feature, &self.model)
            .with_tokens(self.usage)
            .with_cost(self.input_cost_usd, self.output_cost_usd)
    }
}

/// One event of a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text.
    Delta(String),
    /// Stream finished; carries the assembled completion and its cost.
    Done(Completion),
}

/// Boxed stream of completion events.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Accumulates stream deltas into the full-so-far text.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    deltas: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta, returning `(incremental, accumulated)`.
    pub fn push<'a>(&'a mut self, delta: &'a str) -> (&'a str, &'a str) {
        self.text.push_str(delta);
        self.deltas += 1;
        (delta, &self.text)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn delta_count(&self) -> usize {
        self.deltas
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Embedding vectors for a batch of inputs, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub input_cost_usd: f64,
}

// =============================================================================
// AUDIO
// =============================================================================

/// Audio to transcribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioSource {
    Inline {
        data_base64: String,
        mime_type: String,
        #[serde(default)]
        filename: Option<String>,
    },
    Remote {
        url: String,
    },
}

/// Normalized transcription output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub model: String,
    pub language: Option<String>,
    /// Duration as reported by the provider, if any.
    pub duration_secs: Option<f64>,
    /// Size of the audio actually sent.
    pub audio_bytes: usize,
}

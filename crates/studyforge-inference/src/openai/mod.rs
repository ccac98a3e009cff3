//! OpenAI-compatible completion provider.
//!
//! Works with any endpoint that speaks the OpenAI REST dialect (OpenAI,
//! OpenRouter, Azure OpenAI, vLLM, Ollama in compatibility mode):
//!
//! - `POST /chat/completions` (plain and SSE streaming)
//! - `POST /embeddings`
//! - `POST /audio/transcriptions` (multipart)
//!
//! # Example
//!
//! ```rust,no_run
//! use studyforge_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use studyforge_inference::{CompletionProvider, CompletionRequest, PricingTable};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OpenAIConfig {
//!         base_url: "http://localhost:11434/v1".to_string(),
//!         chat_model: "llama3".to_string(),
//!         ..OpenAIConfig::default()
//!     };
//!     let backend = OpenAIBackend::new(config, PricingTable::new()).unwrap();
//!
//!     let completion = backend
//!         .complete(CompletionRequest::new().user("Summarise photosynthesis"))
//!         .await
//!         .unwrap();
//!     println!("{} (${:.6})", completion.message, completion.input_cost_usd);
//! }
//! ```

mod backend;
mod error;
mod streaming;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig};
pub use error::{to_studyforge_error, OpenAIErrorCode, Operation};
pub use streaming::parse_sse_stream;
pub use types::*;

//! # studyforge-inference
//!
//! Completion provider adapter for the StudyForge pipeline.
//!
//! This crate provides:
//! - An OpenAI-compatible [`CompletionProvider`] (chat, SSE streaming,
//!   embeddings, multipart transcription), feature `openai`
//! - A per-model [`PricingTable`] with environment overrides
//! - A scripted mock provider for tests, feature `mock`
//!
//! # Feature Flags
//!
//! - `openai` (default): Enable the OpenAI-compatible backend
//! - `mock`: Expose [`mock::MockProvider`] to downstream crates

pub mod pricing;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use studyforge_core::*;

pub use pricing::{ModelPrice, PricingTable};

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};

//! # studyforge-core
//!
//! Core types, traits, and abstractions for the StudyForge AI task pipeline.
//!
//! This crate provides the job and usage models, the completion-provider
//! contract, and the repository traits that the other StudyForge crates
//! implement or depend on.

pub mod completion;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod tokenizer;
pub mod traits;

// Re-export commonly used types at crate root
pub use completion::*;
pub use error::{Error, Result};
pub use models::*;
pub use tokenizer::*;
pub use traits::*;

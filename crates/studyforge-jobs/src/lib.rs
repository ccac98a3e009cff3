//! # studyforge-jobs
//!
//! Job execution for the StudyForge AI task pipeline.
//!
//! This crate provides:
//! - Compare-and-set claiming of the oldest pending job
//! - Dispatch by job type to one handler per type
//! - Token-budgeted document chunking with bounded per-chunk concurrency
//! - Throttled partial-result writes for streaming output
//! - Best-effort usage recording
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use studyforge_db::Database;
//! use studyforge_inference::OpenAIBackend;
//! use studyforge_jobs::{WorkerBuilder, WorkerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let wake = db.jobs.job_notify();
//! let provider = OpenAIBackend::from_env()?;
//!
//! let worker = WorkerBuilder::new(Arc::new(db.jobs), Arc::new(db.usage), Arc::new(provider))
//!     .with_config(WorkerConfig::from_env())
//!     .with_wake(wake)
//!     .build()?;
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod chunker;
pub mod dispatcher;
pub mod handler;
pub mod handlers;
pub mod throttle;
pub mod usage;
pub mod worker;

// Re-export core types
pub use studyforge_core::*;

pub use chunker::{join_sources, Chunk, DocumentChunker, JoinedDocument, SourceSpan};
pub use dispatcher::Dispatcher;
pub use handler::{HandlerOutput, JobContext, TaskHandler};
pub use handlers::{
    merge_candidates, ChatHandler, EmbedHandler, GradeHandler, HandlerConfig, MetadataHandler,
    PlanHandler, PracticeExamHandler, TranscribeHandler,
};
pub use throttle::PartialResultWriter;
pub use usage::UsageRecorder;
pub use worker::{
    truncate_error, JobWorker, PollOutcome, WorkerBuilder, WorkerConfig, WorkerEvent,
    WorkerHandle,
};

//! Core traits for StudyForge abstractions.
//!
//! These traits define the seams between the worker and its collaborators:
//! the job store, the usage store, and the completion provider. Each has a
//! PostgreSQL or HTTP implementation plus an in-memory or scripted one for
//! tests.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::completion::{
    AudioSource, Completion, CompletionRequest, CompletionStream, Embeddings, Transcript,
};
use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable job queue.
///
/// Every mutation after submission is a single guarded update: `try_claim`
/// requires `status = pending`, all others require `status = running`. A
/// guard miss is reported as `Ok(false)` / `Ok(None)`, never as an error.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new pending job and return its id.
    async fn submit(&self, owner: &str, job_type: &str, payload: JsonValue) -> Result<Uuid>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Oldest pending job, ties broken by id.
    async fn oldest_pending(&self) -> Result<Option<Job>>;

    /// Compare-and-set `pending → running`.
    ///
    /// Returns the claimed job, or `None` when another worker got there first.
    async fn try_claim(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Overwrite the partial result of a running job.
    async fn set_partial_result(&self, job_id: Uuid, text: &str) -> Result<bool>;

    /// Mark a running job succeeded.
    async fn succeed(&self, job_id: Uuid, result: JsonValue) -> Result<bool>;

    /// Mark a running job failed.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<bool>;

    /// Get pending jobs count.
    async fn pending_count(&self) -> Result<i64>;

    /// List recent jobs, newest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>>;

    /// Get queue statistics.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

// =============================================================================
// USAGE STORE
// =============================================================================

/// Append-only store of usage records.
#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Persist one record. Records are never updated.
    async fn insert(&self, record: &UsageRecord) -> Result<()>;

    /// All records for a job, oldest first.
    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<UsageRecord>>;

    /// Sum of `total_cost_usd` for an owner.
    async fn total_cost_for_owner(&self, owner: &str) -> Result<f64>;
}

// =============================================================================
// COMPLETION PROVIDER
// =============================================================================

/// External language-model capability with pricing applied.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Single chat completion.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    /// Streaming chat completion.
    ///
    /// The stream yields deltas and ends with exactly one `StreamEvent::Done`.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream>;

    /// Embed texts, one vector per input in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Embeddings>;

    /// Transcribe audio.
    async fn transcribe(&self, audio: &AudioSource) -> Result<Transcript>;

    /// Price an audio duration for the given transcription model.
    fn price_audio(&self, model: &str, duration_secs: f64) -> f64;

    /// Default chat model identifier.
    fn chat_model(&self) -> &str;
}

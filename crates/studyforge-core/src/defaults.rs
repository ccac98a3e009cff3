//! Centralized default constants for the StudyForge pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Every `from_env()` constructor falls back to these constants, so changing a
//! default here changes it for the worker binary, the tests, and any embedder.

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Polling interval when the queue is empty (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Maximum characters stored in a failed job's `error` column.
pub const ERROR_MESSAGE_MAX_CHARS: usize = 500;

/// Broadcast capacity for worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Default number of jobs returned by `list_recent`.
pub const RECENT_JOBS_LIMIT: i64 = 50;

// =============================================================================
// PLAN GENERATION
// =============================================================================

/// Maximum provider calls in flight for one plan job.
pub const PLAN_CHUNK_CONCURRENCY: usize = 3;

/// Token budget for each document chunk sent to the model.
pub const PLAN_CHUNK_TOKENS: usize = 6_000;

/// Token ceiling for past-exam text attached to every chunk prompt.
pub const PLAN_PAST_EXAM_TOKENS: usize = 1_500;

/// Policy string describing how the plan should target a passing grade.
pub const PASSING_THRESHOLD_POLICY: &str = "The student's goal is to reach at least a passing \
grade (70%). Rank topics so that mastering every `core` entry alone is enough to pass; \
`high-yield` entries push toward a strong grade; `stretch` entries are optional depth.";

/// Title used when a chunk or a whole plan yields no usable entries.
pub const FALLBACK_PLAN_TITLE: &str = "General Study";

// =============================================================================
// CHAT STREAMING
// =============================================================================

/// Minimum interval between `partial_result` writes while streaming.
pub const PARTIAL_RESULT_THROTTLE_MS: u64 = 150;

// =============================================================================
// PRACTICE EXAMS
// =============================================================================

/// Questions generated when the payload does not ask for a count.
pub const PRACTICE_EXAM_QUESTIONS: usize = 10;

/// Upper bound on requested questions per exam.
pub const PRACTICE_EXAM_MAX_QUESTIONS: usize = 50;

/// Token ceiling for source text sent to the practice-exam prompt.
pub const PRACTICE_EXAM_SOURCE_TOKENS: usize = 8_000;

// =============================================================================
// METADATA
// =============================================================================

/// Characters of uploaded text sent to the metadata prompt.
pub const METADATA_PREVIEW_CHARS: usize = 6_000;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default chat completion model.
pub const CHAT_MODEL: &str = "gpt-4o-mini";

/// Default embedding model.
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Default transcription model.
pub const TRANSCRIBE_MODEL: &str = "whisper-1";

/// Default provider base URL.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Request timeout for provider calls (seconds).
pub const INFERENCE_TIMEOUT_SECS: u64 = 300;

/// Bytes per second assumed when estimating audio duration from payload size
/// (128 kbit/s compressed audio).
pub const AUDIO_BYTES_PER_SECOND: f64 = 16_000.0;

// =============================================================================
// PRICING (USD)
// =============================================================================

/// Fallback input price per 1K tokens for unrecognised models.
pub const FALLBACK_INPUT_PER_1K: f64 = 0.0005;

/// Fallback output price per 1K tokens for unrecognised models.
pub const FALLBACK_OUTPUT_PER_1K: f64 = 0.0015;

/// Transcription price per audio minute.
pub const TRANSCRIBE_PER_MINUTE: f64 = 0.006;

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL when `DATABASE_URL` is unset.
pub const DATABASE_URL: &str = "postgres://localhost/studyforge";

/// Default maximum pool connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_budgets_leave_room_for_past_exam() {
        assert!(PLAN_PAST_EXAM_TOKENS < PLAN_CHUNK_TOKENS);
    }

    #[test]
    fn test_concurrency_is_bounded_and_nonzero() {
        assert!(PLAN_CHUNK_CONCURRENCY >= 1);
        assert!(PLAN_CHUNK_CONCURRENCY <= 8);
    }

    #[test]
    fn test_practice_exam_default_within_max() {
        assert!(PRACTICE_EXAM_QUESTIONS <= PRACTICE_EXAM_MAX_QUESTIONS);
    }
}

//! Per-type task handlers.

use std::time::Duration;

use studyforge_core::defaults;

mod chat;
mod embed;
mod grade;
mod metadata;
pub mod parse;
mod plan;
mod practice_exam;
mod transcribe;

pub use chat::ChatHandler;
pub use embed::EmbedHandler;
pub use grade::GradeHandler;
pub use metadata::MetadataHandler;
pub use plan::{merge_candidates, PlanHandler};
pub use practice_exam::PracticeExamHandler;
pub use transcribe::TranscribeHandler;

/// Tunables shared by the handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerConfig {
    /// Maximum provider calls in flight for one plan job.
    pub plan_chunk_concurrency: usize,
    /// Token budget for each plan chunk.
    pub plan_chunk_tokens: usize,
    /// Token ceiling for past-exam text attached to every chunk prompt.
    pub plan_past_exam_tokens: usize,
    /// Minimum interval between streamed `partial_result` writes.
    pub partial_result_throttle: Duration,
    /// Token ceiling for source text in a practice-exam prompt.
    pub practice_exam_source_tokens: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            plan_chunk_concurrency: defaults::PLAN_CHUNK_CONCURRENCY,
            plan_chunk_tokens: defaults::PLAN_CHUNK_TOKENS,
            plan_past_exam_tokens: defaults::PLAN_PAST_EXAM_TOKENS,
            partial_result_throttle: Duration::from_millis(defaults::PARTIAL_RESULT_THROTTLE_MS),
            practice_exam_source_tokens: defaults::PRACTICE_EXAM_SOURCE_TOKENS,
        }
    }
}

impl HandlerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PLAN_CHUNK_CONCURRENCY` | `3` |
    /// | `PLAN_CHUNK_TOKENS` | `6000` |
    /// | `PLAN_PAST_EXAM_TOKENS` | `1500` |
    /// | `PARTIAL_RESULT_THROTTLE_MS` | `150` |
    pub fn from_env() -> Self {
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            plan_chunk_concurrency: env_parse("PLAN_CHUNK_CONCURRENCY")
                .unwrap_or(defaults.plan_chunk_concurrency)
                .max(1),
            plan_chunk_tokens: env_parse("PLAN_CHUNK_TOKENS").unwrap_or(defaults.plan_chunk_tokens),
            plan_past_exam_tokens: env_parse("PLAN_PAST_EXAM_TOKENS")
                .unwrap_or(defaults.plan_past_exam_tokens),
            partial_result_throttle: env_parse("PARTIAL_RESULT_THROTTLE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.partial_result_throttle),
            practice_exam_source_tokens: defaults.practice_exam_source_tokens,
        }
    }

    pub fn with_plan_chunk_concurrency(mut self, n: usize) -> Self {
        self.plan_chunk_concurrency = n.max(1);
        self
    }

    pub fn with_plan_chunk_tokens(mut self, tokens: usize) -> Self {
        self.plan_chunk_tokens = tokens;
        self
    }

    pub fn with_partial_result_throttle(mut self, interval: Duration) -> Self {
        self.partial_result_throttle = interval;
        self
    }
}

//! Structured logging field names for the StudyForge pipeline.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query a job across claim, dispatch, provider calls,
//! and usage recording by the same keys.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Store unreachable, finalisation lost; requires operator attention |
//! | WARN  | Recoverable issue, fallback applied (parse fallback, usage not recorded) |
//! | INFO  | Lifecycle events (startup, shutdown), job claim and completion |
//! | DEBUG | Decision points, claim races, config choices |
//! | TRACE | Per-chunk and per-delta detail |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "jobs", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "plan", "chat", "openai", "pool", "claimer"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim", "complete", "complete_stream", "record_usage"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Declared job type.
pub const JOB_TYPE: &str = "job_type";

/// Submitting principal.
pub const OWNER: &str = "owner";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks a document was split into.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Zero-based chunk index.
pub const CHUNK_INDEX: &str = "chunk_index";

/// Number of input texts sent to an embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Total tokens reported by the provider.
pub const TOTAL_TOKENS: &str = "total_tokens";

/// Total cost in USD.
pub const COST_USD: &str = "cost_usd";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

//! Core data models for the StudyForge pipeline.
//!
//! These types are shared across all StudyForge crates: the job queue row,
//! its closed set of types and statuses, and the immutable usage record.

pub mod study;

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Error;

pub use study::*;

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the queue.
///
/// `Pending → Running → {Succeeded | Failed}`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Serialization(format!("unknown job status: {other}"))),
        }
    }
}

/// Type of job to process.
///
/// The set is closed: the dispatcher matches on it exhaustively, so adding a
/// variant is a compile-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Generate a study plan from uploaded course material
    Plan,
    /// Streaming tutoring chat reply
    Chat,
    /// Grade a student's answer
    Grade,
    /// Transcribe a lecture recording
    Transcribe,
    /// Embed a list of texts
    Embed,
    /// Synthesise a practice exam
    PracticeExam,
    /// Extract title/course/topic metadata from an upload
    Metadata,
}

impl JobType {
    /// Every job type, in declaration order.
    pub const ALL: [JobType; 7] = [
        JobType::Plan,
        JobType::Chat,
        JobType::Grade,
        JobType::Transcribe,
        JobType::Embed,
        JobType::PracticeExam,
        JobType::Metadata,
    ];

    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Plan => "plan",
            JobType::Chat => "chat",
            JobType::Grade => "grade",
            JobType::Transcribe => "transcribe",
            JobType::Embed => "embed",
            JobType::PracticeExam => "practice_exam",
            JobType::Metadata => "metadata",
        }
    }

    /// Whether the worker runs this type as a detached background task.
    ///
    /// Plan generation can outlive a single invocation window, so the worker
    /// returns right after claiming and the caller polls the job row.
    pub fn runs_detached(&self) -> bool {
        matches!(self, JobType::Plan)
    }

    /// Feature name recorded on usage records for this type.
    pub fn feature(&self) -> &'static str {
        match self {
            JobType::Plan => "study_plan",
            JobType::Chat => "tutor_chat",
            JobType::Grade => "grading",
            JobType::Transcribe => "transcription",
            JobType::Embed => "embedding",
            JobType::PracticeExam => "practice_exam",
            JobType::Metadata => "document_metadata",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(JobType::Plan),
            "chat" => Ok(JobType::Chat),
            "grade" => Ok(JobType::Grade),
            "transcribe" => Ok(JobType::Transcribe),
            "embed" => Ok(JobType::Embed),
            "practice_exam" => Ok(JobType::PracticeExam),
            "metadata" => Ok(JobType::Metadata),
            other => Err(Error::UnknownJobType(other.to_string())),
        }
    }
}

/// A job in the processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Submitting principal.
    pub owner: String,
    /// Declared type, kept raw so an unrecognised value reaches the dispatcher.
    pub job_type: String,
    pub status: JobStatus,
    pub payload: JsonValue,
    pub result: Option<JsonValue>,
    /// Incremental output, overwritten in place while running.
    pub partial_result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh pending job.
    pub fn new_pending(owner: impl Into<String>, job_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner: owner.into(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            payload,
            result: None,
            partial_result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Parse the declared type into the closed set.
    pub fn kind(&self) -> Result<JobType, Error> {
        self.job_type.parse()
    }
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub succeeded_last_hour: i64,
    pub failed_last_hour: i64,
    pub total: i64,
}

// =============================================================================
// USAGE TYPES
// =============================================================================

/// Token counts reported by a provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// Normalized usage a handler reports for one job.
///
/// The usage recorder turns this into a persisted [`UsageRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub feature: String,
    pub model: String,
    pub token_usage: Option<TokenUsage>,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub audio_duration_secs: Option<f64>,
    pub metadata: JsonValue,
}

impl UsageReport {
    pub fn new(feature: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            model: model.into(),
            token_usage: None,
            input_cost_usd: 0.0,
            output_cost_usd: 0.0,
            audio_duration_secs: None,
            metadata: JsonValue::Object(Default::default()),
        }
    }

    pub fn with_tokens(mut self, usage: Option<TokenUsage>) -> Self {
        self.token_usage = usage;
        self
    }

    pub fn with_cost(mut self, input_cost_usd: f64, output_cost_usd: f64) -> Self {
        self.input_cost_usd = input_cost_usd;
        self.output_cost_usd = output_cost_usd;
        self
    }

    pub fn with_audio_duration(mut self, secs: f64) -> Self {
        self.audio_duration_secs = Some(secs);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.input_cost_usd + self.output_cost_usd
    }
}

/// Immutable cost/usage fact for one completed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub owner: String,
    pub feature: String,
    pub model: String,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
    pub audio_duration_secs: Option<f64>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Token counts are stored as INTEGER; oversized counts pin at `i32::MAX`.
fn saturating_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

impl UsageRecord {
    /// Stamp a handler's report with identity and creation time.
    pub fn from_report(job_id: Uuid, owner: &str, report: UsageReport) -> Self {
        let tokens = report.token_usage;
        Self {
            id: Uuid::now_v7(),
            job_id,
            owner: owner.to_string(),
            total_cost_usd: report.total_cost_usd(),
            feature: report.feature,
            model: report.model,
            prompt_tokens: tokens.map(|t| saturating_i32(t.prompt_tokens)),
            completion_tokens: tokens.map(|t| saturating_i32(t.completion_tokens)),
            total_tokens: tokens.map(|t| saturating_i32(t.total_tokens)),
            input_cost_usd: report.input_cost_usd,
            output_cost_usd: report.output_cost_usd,
            audio_duration_secs: report.audio_duration_secs,
            metadata: report.metadata,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_type_round_trip() {
        for job_type in JobType::ALL {
            let parsed: JobType = job_type.as_str().parse().unwrap();
            assert_eq!(parsed, job_type);
        }
    }

    #[test]
    fn test_job_type_strings_are_unique() {
        let mut strings: Vec<&str> = JobType::ALL.iter().map(|t| t.as_str()).collect();
        strings.sort();
        strings.dedup();
        assert_eq!(strings.len(), JobType::ALL.len());
    }

    #[test]
    fn test_job_type_unknown_is_error() {
        let err = "flashcards".parse::<JobType>().unwrap_err();
        assert!(matches!(err, Error::UnknownJobType(ref t) if t == "flashcards"));
    }

    #[test]
    fn test_job_type_parse_is_case_sensitive() {
        assert!("Plan".parse::<JobType>().is_err());
        assert!("PRACTICE_EXAM".parse::<JobType>().is_err());
    }

    #[test]
    fn test_job_type_serde_matches_as_str() {
        for job_type in JobType::ALL {
            let json = serde_json::to_value(job_type).unwrap();
            assert_eq!(json, json!(job_type.as_str()));
        }
    }

    #[test]
    fn test_only_plan_runs_detached() {
        let detached: Vec<JobType> = JobType::ALL
            .into_iter()
            .filter(|t| t.runs_detached())
            .collect();
        assert_eq!(detached, vec![JobType::Plan]);
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_new_pending_job() {
        let job = Job::new_pending("student-1", "grade", json!({"answer": "42"}));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.kind().unwrap(), JobType::Grade);
        assert!(job.result.is_none());
        assert!(job.partial_result.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_job_kind_unknown() {
        let job = Job::new_pending("student-1", "mystery", json!({}));
        assert!(matches!(job.kind(), Err(Error::UnknownJobType(_))));
    }

    #[test]
    fn test_token_usage_add_assign() {
        let mut total = TokenUsage::default();
        total += TokenUsage::new(100, 20);
        total += TokenUsage::new(50, 5);
        assert_eq!(total, TokenUsage::new(150, 25));
        assert_eq!(total.total_tokens, 175);
    }

    #[test]
    fn test_usage_record_from_report() {
        let job_id = Uuid::now_v7();
        let report = UsageReport::new("grading", "gpt-4o-mini")
            .with_tokens(Some(TokenUsage::new(1000, 200)))
            .with_cost(0.00015, 0.00012)
            .with_metadata(json!({"hasImage": true}));

        let record = UsageRecord::from_report(job_id, "student-9", report);
        assert_eq!(record.job_id, job_id);
        assert_eq!(record.owner, "student-9");
        assert_eq!(record.prompt_tokens, Some(1000));
        assert_eq!(record.completion_tokens, Some(200));
        assert_eq!(record.total_tokens, Some(1200));
        assert!((record.total_cost_usd - 0.00027).abs() < 1e-12);
        assert_eq!(record.metadata["hasImage"], true);
    }

    #[test]
    fn test_usage_record_token_counts_saturate() {
        let usage = TokenUsage {
            prompt_tokens: u32::MAX,
            completion_tokens: 12,
            total_tokens: u32::MAX,
        };
        let report = UsageReport::new("study_plan", "gpt-4o-mini").with_tokens(Some(usage));
        let record = UsageRecord::from_report(Uuid::now_v7(), "student-3", report);
        assert_eq!(record.prompt_tokens, Some(i32::MAX));
        assert_eq!(record.completion_tokens, Some(12));
        assert_eq!(record.total_tokens, Some(i32::MAX));
    }

    #[test]
    fn test_usage_record_without_tokens() {
        let report = UsageReport::new("transcription", "whisper-1")
            .with_cost(0.012, 0.0)
            .with_audio_duration(120.0);
        let record = UsageRecord::from_report(Uuid::now_v7(), "student-2", report);
        assert!(record.prompt_tokens.is_none());
        assert!(record.total_tokens.is_none());
        assert_eq!(record.audio_duration_secs, Some(120.0));
    }
}

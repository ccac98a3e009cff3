//! Handler contract shared by every job type.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use studyforge_core::{Error, Job, JobRepository, JobType, Result, UsageReport};

use crate::throttle::PartialResultWriter;

/// What a handler hands back to the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    /// Stored as the job's `result`.
    pub result: JsonValue,
    /// Priced usage to record before the job is marked succeeded.
    pub usage: Option<UsageReport>,
}

impl HandlerOutput {
    pub fn new(result: JsonValue) -> Self {
        Self {
            result,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: UsageReport) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Context provided to job handlers.
pub struct JobContext {
    /// The claimed job being processed.
    pub job: Job,
    jobs: Arc<dyn JobRepository>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job, jobs: Arc<dyn JobRepository>) -> Self {
        Self { job, jobs }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn owner(&self) -> &str {
        &self.job.owner
    }

    /// Get the job payload.
    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// Deserialize the payload into a handler's input type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.job.payload.clone()).map_err(|e| {
            Error::InvalidInput(format!("Invalid {} payload: {e}", self.job.job_type))
        })
    }

    /// Overwrite the job's partial result.
    ///
    /// Returns `false` when the job is no longer running.
    pub async fn write_partial(&self, text: &str) -> Result<bool> {
        let written = self.jobs.set_partial_result(self.job.id, text).await?;
        if !written {
            debug!(job_id = %self.job.id, "Partial result dropped, job no longer running");
        }
        Ok(written)
    }

    /// A throttled partial-result writer for this job.
    pub fn partial_writer(&self, min_interval: Duration) -> PartialResultWriter<'_> {
        PartialResultWriter::new(self, min_interval)
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    ///
    /// Errors propagate to the worker, which records them on the job.
    async fn execute(&self, ctx: &JobContext) -> Result<HandlerOutput>;
}

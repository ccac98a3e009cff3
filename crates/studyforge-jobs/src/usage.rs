//! Best-effort usage recording.

use std::sync::Arc;

use tracing::{info, warn};

use studyforge_core::{Job, UsageRecord, UsageReport, UsageRepository};

/// Persists one usage record per completed, priced operation.
///
/// Failures are logged at WARN and never affect the job's outcome.
#[derive(Clone)]
pub struct UsageRecorder {
    usage: Arc<dyn UsageRepository>,
}

impl UsageRecorder {
    pub fn new(usage: Arc<dyn UsageRepository>) -> Self {
        Self { usage }
    }

    /// Record `report` against `job`; returns whether the record was stored.
    pub async fn record(&self, job: &Job, report: UsageReport) -> bool {
        let record = UsageRecord::from_report(job.id, &job.owner, report);
        match self.usage.insert(&record).await {
            Ok(()) => {
                info!(
                    subsystem = "jobs",
                    component = "usage",
                    op = "record_usage",
                    job_id = %job.id,
                    feature = %record.feature,
                    model = %record.model,
                    total_tokens = record.total_tokens.unwrap_or(0),
                    cost_usd = record.total_cost_usd,
                    "Usage recorded"
                );
                true
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "usage",
                    op = "record_usage",
                    job_id = %job.id,
                    feature = %record.feature,
                    error = %e,
                    "Failed to record usage"
                );
                false
            }
        }
    }
}

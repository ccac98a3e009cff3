//! In-memory job store and usage ledger.
//!
//! Same guarded-transition semantics as the PostgreSQL repositories, without a
//! database. Used by the worker tests and by local runs that do not need
//! durability.
//!
//! ```rust,ignore
//! use studyforge_db::memory::MemoryJobStore;
//!
//! let store = MemoryJobStore::new();
//! let id = store.submit("student-1", "embed", json!({"inputs": ["a"]})).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use studyforge_core::{
    Error, Job, JobRepository, JobStatus, QueueStats, Result, UsageRecord, UsageRepository,
};

/// One observed `set_partial_result` write.
#[derive(Debug, Clone)]
pub struct PartialWrite {
    pub at: Instant,
    pub text: String,
}

#[derive(Default)]
struct JobState {
    /// Jobs in submission order.
    jobs: Vec<Job>,
    partial_writes: HashMap<Uuid, Vec<PartialWrite>>,
}

impl JobState {
    fn find_mut(&mut self, job_id: Uuid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == job_id)
    }

    /// Apply `f` to a running job; `false` when the guard does not hold.
    fn update_running(&mut self, job_id: Uuid, f: impl FnOnce(&mut Job)) -> bool {
        match self.find_mut(job_id) {
            Some(job) if job.status == JobStatus::Running => {
                f(job);
                true
            }
            _ => false,
        }
    }
}

/// Mutex-guarded in-memory job store.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<JobState>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed job, e.g. one with a hand-picked `created_at`.
    pub async fn insert(&self, job: Job) {
        self.state.lock().await.jobs.push(job);
    }

    /// Every partial write applied to a job, in order.
    pub async fn partial_writes(&self, job_id: Uuid) -> Vec<PartialWrite> {
        self.state
            .lock()
            .await
            .partial_writes
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of all jobs in submission order.
    pub async fn all(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }
}

#[async_trait]
impl JobRepository for MemoryJobStore {
    async fn submit(&self, owner: &str, job_type: &str, payload: JsonValue) -> Result<Uuid> {
        let job = Job::new_pending(owner, job_type, payload);
        let id = job.id;
        self.state.lock().await.jobs.push(job);
        Ok(id)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn oldest_pending(&self) -> Result<Option<Job>> {
        let state = self.state.lock().await;
        // min_by_key keeps the first of equal keys, so submission order breaks ties.
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| j.created_at)
            .cloned())
    }

    async fn try_claim(&self, job_id: Uuid) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        match state.find_mut(job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            Some(_) => Ok(None),
            None => Err(Error::NotFound(format!("job {job_id}"))),
        }
    }

    async fn set_partial_result(&self, job_id: Uuid, text: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let applied = state.update_running(job_id, |job| {
            job.partial_result = Some(text.to_string());
        });
        if applied {
            state
                .partial_writes
                .entry(job_id)
                .or_default()
                .push(PartialWrite {
                    at: Instant::now(),
                    text: text.to_string(),
                });
        }
        Ok(applied)
    }

    async fn succeed(&self, job_id: Uuid, result: JsonValue) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.update_running(job_id, |job| {
            job.status = JobStatus::Succeeded;
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
        }))
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.update_running(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.completed_at = Some(Utc::now());
        }))
    }

    async fn pending_count(&self) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count() as i64)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs = state.jobs.clone();
        jobs.reverse();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().await;
        let hour_ago = Utc::now() - Duration::hours(1);
        let recent = |j: &&Job| j.completed_at.is_some_and(|t| t > hour_ago);

        let mut stats = QueueStats {
            total: state.jobs.len() as i64,
            ..Default::default()
        };
        for job in &state.jobs {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Succeeded if recent(&job) => stats.succeeded_last_hour += 1,
                JobStatus::Failed if recent(&job) => stats.failed_last_hour += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}

/// In-memory usage ledger.
#[derive(Clone, Default)]
pub struct MemoryUsageStore {
    records: Arc<Mutex<Vec<UsageRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose inserts always fail.
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl UsageRepository for MemoryUsageStore {
    async fn insert(&self, record: &UsageRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal("usage store unavailable".to_string()));
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<UsageRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn total_cost_for_owner(&self, owner: &str) -> Result<f64> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.owner == owner)
            .map(|r| r.total_cost_usd)
            .sum())
    }
}

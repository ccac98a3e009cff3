//! Job claimer and worker loop.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use studyforge_core::{
    defaults, CompletionProvider, Error, Job, JobRepository, JobStatus, Result,
    TiktokenTokenizer, Tokenizer, UsageRepository,
};

use crate::dispatcher::Dispatcher;
use crate::handler::JobContext;
use crate::handlers::HandlerConfig;
use crate::usage::UsageRecorder;

/// Configuration for the job worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Process at most one job per invocation, then exit.
    pub run_once: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            enabled: true,
            run_once: false,
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v == "false" || v == "0" || v == "no")
        })
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_POLL_INTERVAL_MS` | `1000` | Polling interval when queue is empty |
    /// | `WORKER_RUN_ONCE` | `false` | Single-invocation mode |
    pub fn from_env() -> Self {
        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            enabled: env_flag("JOB_WORKER_ENABLED", true),
            run_once: env_flag("WORKER_RUN_ONCE", false),
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }
}

/// Event emitted by the job worker.
///
/// `job_type` is the declared type string, which may be outside the known set.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A job moved from pending to running on this worker.
    JobClaimed { job_id: Uuid, job_type: String },
    /// A job completed successfully.
    JobSucceeded { job_id: Uuid, job_type: String },
    /// A job failed.
    JobFailed {
        job_id: Uuid,
        job_type: String,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Result of one poll.
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing was claimed: the queue was empty or another worker won the race.
    Idle,
    /// A job ran to completion on this call.
    Finished { job_id: Uuid, status: JobStatus },
    /// A job was claimed and handed to a background task.
    Detached {
        job_id: Uuid,
        handle: JoinHandle<JobStatus>,
    },
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the loop to exit, including any detached jobs it was tracking.
    pub async fn join(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {e}")))
    }
}

/// Bound a failure message for storage on the job row.
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = message.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Everything needed to execute one claimed job, cloneable into a spawned task.
#[derive(Clone)]
struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    dispatcher: Dispatcher,
    recorder: UsageRecorder,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobRunner {
    /// Execute a claimed job and write its terminal state.
    ///
    /// Returns the status the job ended in. Handler and dispatch errors are
    /// recorded on the job, never returned.
    #[instrument(
        skip(self, job),
        fields(subsystem = "jobs", component = "worker", op = "execute", job_id = %job.id, job_type = %job.job_type)
    )]
    async fn execute(self, job: Job) -> JobStatus {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type.clone();

        let outcome = match self.dispatcher.resolve(&job) {
            Ok(handler) => {
                let ctx = JobContext::new(job.clone(), self.jobs.clone());
                handler.execute(&ctx).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(output) => {
                // Recorded before completion so a poller seeing `succeeded` also sees the cost.
                if let Some(report) = output.usage {
                    self.recorder.record(&job, report).await;
                }
                match self.jobs.succeed(job_id, output.result).await {
                    Ok(true) => {
                        info!(
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Job completed successfully"
                        );
                        let _ = self
                            .event_tx
                            .send(WorkerEvent::JobSucceeded { job_id, job_type });
                        JobStatus::Succeeded
                    }
                    Ok(false) => self.lost_finalisation(job_id).await,
                    Err(e) => {
                        error!(error = %e, "Failed to mark job as succeeded");
                        JobStatus::Running
                    }
                }
            }
            Err(err) => {
                let message = truncate_error(&err.to_string(), defaults::ERROR_MESSAGE_MAX_CHARS);
                self.finish_failed(job_id, job_type, message, start).await
            }
        }
    }

    /// Write `failed` with an already-bounded message and emit `JobFailed`.
    async fn finish_failed(
        &self,
        job_id: Uuid,
        job_type: String,
        message: String,
        start: Instant,
    ) -> JobStatus {
        match self.jobs.fail(job_id, &message).await {
            Ok(true) => {
                warn!(
                    %job_id,
                    error = %message,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error: message,
                });
                JobStatus::Failed
            }
            Ok(false) => self.lost_finalisation(job_id).await,
            Err(e) => {
                error!(%job_id, error = %e, "Failed to mark job as failed");
                JobStatus::Running
            }
        }
    }

    /// Run `work` in its own task; a panic there fails the job instead of
    /// leaving it `running`.
    fn spawn_supervised<F>(self, job_id: Uuid, job_type: String, work: F) -> JoinHandle<JobStatus>
    where
        F: Future<Output = JobStatus> + Send + 'static,
    {
        let start = Instant::now();
        tokio::spawn(async move {
            match tokio::spawn(work).await {
                Ok(status) => status,
                Err(e) => {
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        %job_id,
                        error = ?e,
                        "Detached job task panicked"
                    );
                    let message = if e.is_panic() {
                        "Internal error: job task panicked".to_string()
                    } else {
                        "Internal error: job task was cancelled".to_string()
                    };
                    self.finish_failed(job_id, job_type, message, start).await
                }
            }
        })
    }

    /// The guarded terminal write matched no running row; report what the store holds.
    async fn lost_finalisation(&self, job_id: Uuid) -> JobStatus {
        let status = match self.jobs.get(job_id).await {
            Ok(Some(job)) => job.status,
            Ok(None) | Err(_) => JobStatus::Running,
        };
        warn!(%job_id, %status, "Job was no longer running at finalisation");
        status
    }
}

/// Job worker that claims and processes jobs from the queue.
pub struct JobWorker {
    config: WorkerConfig,
    runner: JobRunner,
    wake: Option<Arc<Notify>>,
}

impl JobWorker {
    /// Claim the oldest pending job and process it.
    ///
    /// Plan jobs run in a spawned task and come back as
    /// [`PollOutcome::Detached`]; every other type runs to completion here.
    /// Errors are store failures only.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let Some(candidate) = self.runner.jobs.oldest_pending().await? else {
            debug!(subsystem = "jobs", component = "claimer", "Queue empty");
            return Ok(PollOutcome::Idle);
        };
        let Some(job) = self.runner.jobs.try_claim(candidate.id).await? else {
            debug!(
                subsystem = "jobs",
                component = "claimer",
                job_id = %candidate.id,
                "Claim race lost"
            );
            return Ok(PollOutcome::Idle);
        };

        let job_id = job.id;
        info!(
            subsystem = "jobs",
            component = "claimer",
            op = "claim",
            %job_id,
            job_type = %job.job_type,
            owner = %job.owner,
            "Job claimed"
        );
        let _ = self.runner.event_tx.send(WorkerEvent::JobClaimed {
            job_id,
            job_type: job.job_type.clone(),
        });

        let detached = job.kind().map(|t| t.runs_detached()).unwrap_or(false);
        if detached {
            let job_type = job.job_type.clone();
            let work = self.runner.clone().execute(job);
            let handle = self.runner.clone().spawn_supervised(job_id, job_type, work);
            return Ok(PollOutcome::Detached { job_id, handle });
        }

        let status = self.runner.clone().execute(job).await;
        Ok(PollOutcome::Finished { job_id, status })
    }

    /// Execute an already-claimed job in place.
    pub async fn execute(&self, job: Job) -> JobStatus {
        self.runner.clone().execute(job).await
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.runner.event_tx.subscribe()
    }

    /// Get the pending job count.
    pub async fn pending_count(&self) -> Result<i64> {
        self.runner.jobs.pending_count().await
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.runner.event_tx.subscribe();

        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            join,
        }
    }

    /// Run the polling loop until shutdown.
    ///
    /// Polls again immediately after a job, sleeps for the poll interval
    /// (or until woken) when idle. Detached jobs are awaited before the loop
    /// reports `WorkerStopped`.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    pub async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(poll_interval_ms = self.config.poll_interval_ms, "Job worker started");
        let _ = self.runner.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut detached: Vec<JoinHandle<JobStatus>> = Vec::new();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }
            detached.retain(|h| !h.is_finished());

            let idle = match self.poll_once().await {
                Ok(PollOutcome::Idle) => true,
                Ok(PollOutcome::Finished { .. }) => false,
                Ok(PollOutcome::Detached { handle, .. }) => {
                    detached.push(handle);
                    false
                }
                Err(e) => {
                    error!(error = %e, "Failed to poll job queue");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                    _ = wait_for_wake(self.wake.as_deref()) => {
                        debug!("Woken by job submission");
                    }
                }
            }
        }

        if !detached.is_empty() {
            info!(count = detached.len(), "Waiting for detached jobs");
        }
        for handle in detached {
            if let Err(e) = handle.await {
                error!(error = ?e, "Detached job supervisor failed");
            }
        }

        let _ = self.runner.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }
}

async fn wait_for_wake(wake: Option<&Notify>) {
    match wake {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    usage: Arc<dyn UsageRepository>,
    provider: Arc<dyn CompletionProvider>,
    config: WorkerConfig,
    handler_config: HandlerConfig,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    wake: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        usage: Arc<dyn UsageRepository>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            jobs,
            usage,
            provider,
            config: WorkerConfig::default(),
            handler_config: HandlerConfig::default(),
            tokenizer: None,
            wake: None,
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler_config(mut self, config: HandlerConfig) -> Self {
        self.handler_config = config;
        self
    }

    /// Override the tokenizer used for chunking and prompt truncation.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Cut the idle sleep short whenever `notify` fires.
    pub fn with_wake(mut self, notify: Arc<Notify>) -> Self {
        self.wake = Some(notify);
        self
    }

    /// Build and return the worker.
    ///
    /// Without an explicit tokenizer, loads the tiktoken vocabulary for the
    /// provider's chat model.
    pub fn build(self) -> Result<JobWorker> {
        let tokenizer: Arc<dyn Tokenizer> = match self.tokenizer {
            Some(t) => t,
            None => Arc::new(TiktokenTokenizer::for_model_or_default(self.provider.chat_model())?),
        };
        debug!(
            subsystem = "jobs",
            component = "worker",
            tokenizer = tokenizer.name(),
            plan_chunk_concurrency = self.handler_config.plan_chunk_concurrency,
            "Building job worker"
        );

        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Ok(JobWorker {
            config: self.config,
            runner: JobRunner {
                jobs: self.jobs,
                dispatcher: Dispatcher::new(self.provider, tokenizer, self.handler_config),
                recorder: UsageRecorder::new(self.usage),
                event_tx,
            },
            wake: self.wake,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use studyforge_core::EstimatingTokenizer;
    use studyforge_db::{MemoryJobStore, MemoryUsageStore};
    use studyforge_inference::mock::MockProvider;

    fn worker(store: &MemoryJobStore, provider: MockProvider) -> JobWorker {
        WorkerBuilder::new(
            Arc::new(store.clone()),
            Arc::new(MemoryUsageStore::new()),
            Arc::new(provider),
        )
        .with_tokenizer(Arc::new(EstimatingTokenizer))
        .with_config(WorkerConfig::default().with_poll_interval(10))
        .build()
        .unwrap()
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.enabled);
        assert!(!config.run_once);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(250)
            .with_enabled(false)
            .with_run_once(true);
        assert_eq!(config.poll_interval_ms, 250);
        assert!(!config.enabled);
        assert!(config.run_once);
    }

    #[test]
    fn test_truncate_error() {
        assert_eq!(truncate_error("short", 10), "short");
        let long = "é".repeat(600);
        let truncated = truncate_error(&long, 500);
        assert_eq!(truncated.chars().count(), 500);
        assert!(truncated.ends_with("..."));
    }

    #[tokio::test]
    async fn test_poll_empty_queue_is_idle() {
        let store = MemoryJobStore::new();
        let outcome = worker(&store, MockProvider::new()).poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Idle));
    }

    #[tokio::test]
    async fn test_poll_runs_oldest_first() {
        let store = MemoryJobStore::new();
        let first = store
            .submit("student-1", "embed", json!({"inputs": ["a"]}))
            .await
            .unwrap();
        let second = store
            .submit("student-1", "embed", json!({"inputs": ["b"]}))
            .await
            .unwrap();
        let w = worker(&store, MockProvider::new());

        match w.poll_once().await.unwrap() {
            PollOutcome::Finished { job_id, status } => {
                assert_eq!(job_id, first);
                assert_eq!(status, JobStatus::Succeeded);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.get(second).await.unwrap().unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_plan_is_detached() {
        let store = MemoryJobStore::new();
        let id = store
            .submit(
                "student-1",
                "plan",
                json!({"sources": [{"filename": "a.txt", "text": "Enzymes speed reactions."}]}),
            )
            .await
            .unwrap();
        let provider = MockProvider::new()
            .with_default_response(r#"{"entries": [{"title": "Enzymes", "importanceTier": "core"}]}"#);

        let w = worker(&store, provider);
        let handle = match w.poll_once().await.unwrap() {
            PollOutcome::Detached { job_id, handle } => {
                assert_eq!(job_id, id);
                handle
            }
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(handle.await.unwrap(), JobStatus::Succeeded);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.result.unwrap()["entries"][0]["title"], "Enzymes");
    }

    #[tokio::test]
    async fn test_panicked_detached_task_fails_job() {
        let store = MemoryJobStore::new();
        let id = store.submit("student-1", "plan", json!({})).await.unwrap();
        store.try_claim(id).await.unwrap().unwrap();

        let w = worker(&store, MockProvider::new());
        let mut events = w.events();
        async fn explode() -> JobStatus {
            panic!("chunk merge blew up")
        }
        let handle = w.runner.clone().spawn_supervised(id, "plan".into(), explode());

        assert_eq!(handle.await.unwrap(), JobStatus::Failed);
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("panicked"));
        assert!(matches!(events.recv().await.unwrap(), WorkerEvent::JobFailed { job_id, .. } if job_id == id));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let store = MemoryJobStore::new();
        store.submit("student-1", "embed", json!({"inputs": []})).await.unwrap();
        let w = worker(&store, MockProvider::new());
        let mut events = w.events();

        w.poll_once().await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), WorkerEvent::JobClaimed { ref job_type, .. } if job_type == "embed"));
        match events.recv().await.unwrap() {
            WorkerEvent::JobFailed { error, .. } => assert!(error.contains("empty")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let store = MemoryJobStore::new();
        let id = store
            .submit("student-1", "embed", json!({"inputs": ["hello"]}))
            .await
            .unwrap();
        let handle = worker(&store, MockProvider::new()).start();
        let mut events = handle.events();

        loop {
            match events.recv().await.unwrap() {
                WorkerEvent::JobSucceeded { job_id, .. } => {
                    assert_eq!(job_id, id);
                    break;
                }
                WorkerEvent::JobFailed { error, .. } => panic!("job failed: {error}"),
                _ => {}
            }
        }

        handle.shutdown().await.unwrap();
        handle.join().await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_disabled_worker_exits() {
        let store = MemoryJobStore::new();
        let w = WorkerBuilder::new(
            Arc::new(store.clone()),
            Arc::new(MemoryUsageStore::new()),
            Arc::new(MockProvider::new()),
        )
        .with_tokenizer(Arc::new(EstimatingTokenizer))
        .with_config(WorkerConfig::default().with_enabled(false))
        .build()
        .unwrap();
        w.start().join().await.unwrap();
    }
}

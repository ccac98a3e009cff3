//! StudyForge worker binary.
//!
//! Claims queued AI jobs from PostgreSQL and runs them against an
//! OpenAI-compatible provider. Runs continuously by default; with
//! `WORKER_RUN_ONCE=true` it processes at most one job and exits, waiting for
//! a detached plan job to finish first. The continuous loop is woken early by
//! `LISTEN studyforge_jobs` when any process inserts a job.

use std::sync::Arc;

use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use studyforge_core::defaults;
use studyforge_db::{Database, PoolConfig};
use studyforge_inference::OpenAIBackend;
use studyforge_jobs::{HandlerConfig, JobWorker, PollOutcome, WorkerBuilder, WorkerConfig, WorkerEvent};

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: studyforge crates at info, jobs at debug)
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "studyforge_worker=info,studyforge_jobs=debug,studyforge_inference=info,studyforge_db=info"
            .into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("studyforge-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

/// Process at most one job, then return.
async fn run_once(worker: &JobWorker) -> anyhow::Result<()> {
    match worker.poll_once().await? {
        PollOutcome::Idle => info!("No pending jobs"),
        PollOutcome::Finished { job_id, status } => {
            info!(%job_id, %status, "Job processed");
        }
        PollOutcome::Detached { job_id, handle } => {
            info!(%job_id, "Waiting for detached job");
            let status = handle.await?;
            info!(%job_id, %status, "Detached job processed");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let worker_config = WorkerConfig::from_env();
    if !worker_config.enabled {
        info!("Job worker is disabled (JOB_WORKER_ENABLED=false), exiting");
        return Ok(());
    }

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults::DATABASE_URL.to_string());
    let pool_config = if worker_config.run_once {
        PoolConfig::from_env().single_invocation()
    } else {
        PoolConfig::from_env()
    };
    let db = Database::connect_with_config(&database_url, pool_config).await?;
    db.migrate().await?;
    info!("Database connected and migrated");

    let provider = OpenAIBackend::from_env()?;
    info!(
        base_url = %provider.config().base_url,
        chat_model = %provider.config().chat_model,
        "Completion provider configured"
    );

    let listener = if worker_config.run_once {
        None
    } else {
        Some(db.jobs.listen().await?)
    };
    let wake = db.jobs.job_notify();
    let handler_config = HandlerConfig::from_env();
    debug!(?handler_config, ?worker_config, "Worker configuration");

    let worker = WorkerBuilder::new(Arc::new(db.jobs), Arc::new(db.usage), Arc::new(provider))
        .with_config(worker_config.clone())
        .with_handler_config(handler_config)
        .with_wake(wake)
        .build()?;

    if worker_config.run_once {
        return run_once(&worker).await;
    }

    let handle = worker.start();
    let mut events = handle.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkerEvent::JobFailed { job_id, job_type, error } => {
                    debug!(%job_id, %job_type, %error, "Worker event: job failed");
                }
                other => debug!(?other, "Worker event"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Worker already stopped");
    }
    handle.join().await?;
    if let Some(listener) = listener {
        listener.abort();
    }
    info!("Worker exited");
    Ok(())
}

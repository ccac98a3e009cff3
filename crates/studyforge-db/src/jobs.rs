//! Job repository implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgListener;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use studyforge_core::{Error, Job, JobRepository, JobStatus, QueueStats, Result};

/// Channel the `job_queue_submitted` trigger notifies on every insert.
pub const JOB_CHANNEL: &str = "studyforge_jobs";

/// Pause before retrying after the listener connection drops.
const LISTEN_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

const JOB_COLUMNS: &str = "id, owner, job_type, status, payload, result, partial_result, error, \
                           created_at, started_at, completed_at";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Woken on every submission so an idle worker can skip its sleep.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a new PgJobRepository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Get the job notification handle for event-driven waking.
    ///
    /// Fires on submissions through this repository and, once [`listen`]
    /// is running, on inserts from any other process.
    ///
    /// [`listen`]: Self::listen
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Subscribe to [`JOB_CHANNEL`] and forward each notification to
    /// [`job_notify`](Self::job_notify).
    ///
    /// The returned task runs until aborted. A dropped connection is logged
    /// and re-established on the next receive.
    pub async fn listen(&self) -> Result<JoinHandle<()>> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(Error::Database)?;
        listener.listen(JOB_CHANNEL).await.map_err(Error::Database)?;
        info!(
            subsystem = "db",
            component = "jobs",
            op = "listen",
            channel = JOB_CHANNEL,
            "Listening for job submissions"
        );

        let notify = self.notify.clone();
        Ok(tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        trace!(job_id = notification.payload(), "Job submission notified");
                        notify.notify_one();
                    }
                    Err(e) => {
                        warn!(
                            subsystem = "db",
                            component = "jobs",
                            error = %e,
                            "Job listener connection lost, reconnecting"
                        );
                        tokio::time::sleep(LISTEN_RETRY_DELAY).await;
                    }
                }
            }
        }))
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            owner: row.get("owner"),
            job_type: row.get("job_type"),
            status: status.parse::<JobStatus>()?,
            payload: row.get("payload"),
            result: row.get("result"),
            partial_result: row.get("partial_result"),
            error: row.get("error"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn submit(&self, owner: &str, job_type: &str, payload: JsonValue) -> Result<Uuid> {
        let job_id = Uuid::now_v7();

        sqlx::query(
            "INSERT INTO job_queue (id, owner, job_type, status, payload, created_at)
             VALUES ($1, $2, $3, 'pending', $4, $5)",
        )
        .bind(job_id)
        .bind(owner)
        .bind(job_type)
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn oldest_pending(&self) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_queue
             WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC
             LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn try_claim(&self, job_id: Uuid) -> Result<Option<Job>> {
        // The status guard is the whole mutual-exclusion mechanism: of any
        // number of concurrent callers, exactly one sees a returned row.
        let row = sqlx::query(&format!(
            "UPDATE job_queue
             SET status = 'running', started_at = $2
             WHERE id = $1 AND status = 'pending'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if row.is_none() {
            debug!(
                subsystem = "db",
                component = "jobs",
                op = "try_claim",
                job_id = %job_id,
                "Claim guard missed"
            );
        }
        row.map(Self::parse_job_row).transpose()
    }

    async fn set_partial_result(&self, job_id: Uuid, text: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job_queue SET partial_result = $2
             WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn succeed(&self, job_id: Uuid, result: JsonValue) -> Result<bool> {
        let outcome = sqlx::query(
            "UPDATE job_queue
             SET status = 'succeeded', result = $2, completed_at = $3
             WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(&result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<bool> {
        let outcome = sqlx::query(
            "UPDATE job_queue
             SET status = 'failed', error = $2, completed_at = $3
             WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM job_queue WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_queue
             ORDER BY created_at DESC, id DESC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'running') as running,
                COUNT(*) FILTER (WHERE status = 'succeeded' AND completed_at > NOW() - INTERVAL '1 hour') as succeeded_last_hour,
                COUNT(*) FILTER (WHERE status = 'failed' AND completed_at > NOW() - INTERVAL '1 hour') as failed_last_hour,
                COUNT(*) as total
             FROM job_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending"),
            running: row.get::<i64, _>("running"),
            succeeded_last_hour: row.get::<i64, _>("succeeded_last_hour"),
            failed_last_hour: row.get::<i64, _>("failed_last_hour"),
            total: row.get::<i64, _>("total"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_columns_cover_model_fields() {
        for column in [
            "id",
            "owner",
            "job_type",
            "status",
            "payload",
            "result",
            "partial_result",
            "error",
            "created_at",
            "started_at",
            "completed_at",
        ] {
            assert!(
                JOB_COLUMNS.split(", ").any(|c| c.trim() == column),
                "missing column {column}"
            );
        }
    }

    #[tokio::test]
    async fn test_notify_is_shared() {
        let notify = Arc::new(Notify::new());
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let repo = PgJobRepository::with_notify(pool, notify.clone());
        assert!(Arc::ptr_eq(&repo.job_notify(), &notify));
    }
}

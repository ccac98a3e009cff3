//! Usage record repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use studyforge_core::{Error, Result, UsageRecord, UsageRepository};

/// PostgreSQL implementation of UsageRepository.
#[derive(Clone)]
pub struct PgUsageRepository {
    pool: Pool<Postgres>,
}

impl PgUsageRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_usage_row(row: sqlx::postgres::PgRow) -> UsageRecord {
        UsageRecord {
            id: row.get("id"),
            job_id: row.get("job_id"),
            owner: row.get("owner"),
            feature: row.get("feature"),
            model: row.get("model"),
            prompt_tokens: row.get("prompt_tokens"),
            completion_tokens: row.get("completion_tokens"),
            total_tokens: row.get("total_tokens"),
            input_cost_usd: row.get("input_cost_usd"),
            output_cost_usd: row.get("output_cost_usd"),
            total_cost_usd: row.get("total_cost_usd"),
            audio_duration_secs: row.get("audio_duration_secs"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl UsageRepository for PgUsageRepository {
    async fn insert(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO usage_records (
                id, job_id, owner, feature, model,
                prompt_tokens, completion_tokens, total_tokens,
                input_cost_usd, output_cost_usd, total_cost_usd,
                audio_duration_secs, metadata, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(record.id)
        .bind(record.job_id)
        .bind(&record.owner)
        .bind(&record.feature)
        .bind(&record.model)
        .bind(record.prompt_tokens)
        .bind(record.completion_tokens)
        .bind(record.total_tokens)
        .bind(record.input_cost_usd)
        .bind(record.output_cost_usd)
        .bind(record.total_cost_usd)
        .bind(record.audio_duration_secs)
        .bind(&record.metadata)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<UsageRecord>> {
        let rows = sqlx::query(
            "SELECT id, job_id, owner, feature, model, prompt_tokens, completion_tokens,
                    total_tokens, input_cost_usd, output_cost_usd, total_cost_usd,
                    audio_duration_secs, metadata, created_at
             FROM usage_records WHERE job_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_usage_row).collect())
    }

    async fn total_cost_for_owner(&self, owner: &str) -> Result<f64> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_cost_usd), 0)::float8 FROM usage_records WHERE owner = $1",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(total)
    }
}

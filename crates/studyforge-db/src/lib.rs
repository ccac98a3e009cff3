//! # studyforge-db
//!
//! Job store and usage ledger for the StudyForge pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - `PgJobRepository`: the durable job queue with compare-and-set claiming
//! - `PgUsageRepository`: the append-only usage ledger
//! - In-memory equivalents for tests and local runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use studyforge_db::{Database, JobRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/studyforge").await?;
//!     db.migrate().await?;
//!
//!     let job_id = db.jobs.submit("student-1", "chat", serde_json::json!({
//!         "message": "What is a mitochondrion?"
//!     })).await?;
//!
//!     println!("Queued job: {}", job_id);
//!     Ok(())
//! }
//! ```

pub mod jobs;
pub mod memory;
pub mod pool;
pub mod usage;

// Test fixtures for integration tests
#[cfg(feature = "migrations")]
pub mod test_fixtures;

// Re-export core types
pub use studyforge_core::*;

// Re-export repository implementations
pub use jobs::{PgJobRepository, JOB_CHANNEL};
pub use memory::{MemoryJobStore, MemoryUsageStore, PartialWrite};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use usage::PgUsageRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job queue.
    pub jobs: PgJobRepository,
    /// Usage ledger.
    pub usage: PgUsageRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobRepository::new(pool.clone()),
            usage: PgUsageRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            // Share the notify handle so submissions through a clone still
            // wake workers holding the original.
            jobs: PgJobRepository::with_notify(self.pool.clone(), self.jobs.job_notify()),
            usage: self.usage.clone(),
        }
    }
}

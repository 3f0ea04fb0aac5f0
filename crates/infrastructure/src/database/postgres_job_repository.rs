use std::collections::HashMap;

use async_trait::async_trait;
use dispatch_core::{
    models::{GeoPoint, Job, JobStatus},
    traits::JobRepository,
    Result,
};
use sqlx::{types::Json, PgPool, Row};
use tracing::{debug, instrument};

const JOB_COLUMNS: &str =
    "job_id, order_id, driver_id, status, pickup, dropoff, metadata, created_at, updated_at";

pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job> {
        let pickup: Option<Json<GeoPoint>> = row.try_get("pickup")?;
        let dropoff: Option<Json<GeoPoint>> = row.try_get("dropoff")?;
        let metadata: Json<HashMap<String, serde_json::Value>> = row.try_get("metadata")?;

        Ok(Job {
            job_id: row.try_get("job_id")?,
            order_id: row.try_get("order_id")?,
            driver_id: row.try_get("driver_id")?,
            status: row.try_get("status")?,
            pickup: pickup.map(|p| p.0),
            dropoff: dropoff.map(|p| p.0),
            metadata: metadata.0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    async fn insert_if_absent(&self, job: &Job) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, order_id, driver_id, status, pickup, dropoff, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.order_id)
        .bind(&job.driver_id)
        .bind(job.status)
        .bind(job.pickup.as_ref().map(Json))
        .bind(job.dropoff.as_ref().map(Json))
        .bind(Json(&job.metadata))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(inserted, "insert-only job write");
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self))]
    async fn find_for_driver(&self, job_id: &str, driver_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1 AND driver_id = $2"
        ))
        .bind(job_id)
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, statuses))]
    async fn list_for_driver(&self, driver_id: &str, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let statuses: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE driver_id = $1 AND status = ANY($2)"
        ))
        .bind(driver_id)
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id, status = %job.status))]
    async fn save(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, order_id, driver_id, status, pickup, dropoff, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (job_id) DO UPDATE SET
                order_id = EXCLUDED.order_id,
                driver_id = EXCLUDED.driver_id,
                status = EXCLUDED.status,
                pickup = EXCLUDED.pickup,
                dropoff = EXCLUDED.dropoff,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.order_id)
        .bind(&job.driver_id)
        .bind(job.status)
        .bind(job.pickup.as_ref().map(Json))
        .bind(job.dropoff.as_ref().map(Json))
        .bind(Json(&job.metadata))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

//! Job Store
//!
//! Handles all database operations related to jobs.

use async_trait::async_trait;
use cadence_core::domain::{ConcurrencyPolicy, Job, JobStatus};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{JobFilter, JobStore};
use crate::error::{StoreError, StoreResult};

const JOB_COLUMNS: &str = r#"
    id, cron_job_id, scope, watcher, name, schedule, concurrency_policy, suspend,
    status, created_at, started_at, ended_at, conditions, params, results
"#;

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, filter: &JobFilter, limit: Option<i64>) -> StoreResult<Vec<Job>> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM jobs", JOB_COLUMNS));
        push_filter(&mut query, filter);
        query.push(" ORDER BY id DESC");
        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit);
        }

        let rows = query
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Job::try_from).collect()
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &mut Job) -> StoreResult<()> {
        let encoded = EncodedJob::new(job)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (cron_job_id, scope, watcher, name, schedule, concurrency_policy,
                              suspend, status, created_at, started_at, ended_at,
                              conditions, params, results)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(job.cron_job_id)
        .bind(&job.scope)
        .bind(&job.watcher)
        .bind(&job.name)
        .bind(&job.schedule)
        .bind(job.concurrency_policy.as_str())
        .bind(job.suspend)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(encoded.conditions)
        .bind(encoded.params)
        .bind(encoded.results)
        .fetch_one(&self.pool)
        .await?;

        job.id = id;
        Ok(())
    }

    async fn update(&self, job: &Job) -> StoreResult<()> {
        let encoded = EncodedJob::new(job)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET cron_job_id = $2, scope = $3, watcher = $4, name = $5, schedule = $6,
                concurrency_policy = $7, suspend = $8, status = $9, started_at = $10,
                ended_at = $11, conditions = $12, params = $13, results = $14
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.cron_job_id)
        .bind(&job.scope)
        .bind(&job.watcher)
        .bind(&job.name)
        .bind(&job.schedule)
        .bind(job.concurrency_policy.as_str())
        .bind(job.suspend)
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(encoded.conditions)
        .bind(encoded.params)
        .bind(encoded.results)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "job",
                id: job.id,
            });
        }

        Ok(())
    }

    async fn delete(&self, filter: &JobFilter) -> StoreResult<u64> {
        let mut query = QueryBuilder::<Postgres>::new("DELETE FROM jobs");
        push_filter(&mut query, filter);

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, filter: &JobFilter) -> StoreResult<Option<Job>> {
        Ok(self.fetch(filter, Some(1)).await?.into_iter().next())
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<(u64, Vec<Job>)> {
        let jobs = self.fetch(filter, None).await?;
        Ok((jobs.len() as u64, jobs))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter) {
    query.push(" WHERE TRUE");

    if let Some(ids) = &filter.ids {
        query.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(cron_job_id) = filter.cron_job_id {
        query.push(" AND cron_job_id = ").push_bind(cron_job_id);
    }
    if let Some(statuses) = &filter.statuses {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        query.push(" AND status = ANY(").push_bind(names).push(")");
    }
    if let Some(suspend) = filter.suspend {
        query.push(" AND suspend = ").push_bind(suspend);
    }
    if let Some(watcher) = &filter.watcher {
        query.push(" AND watcher = ").push_bind(watcher.clone());
    }
}

/// JSONB columns of a job
struct EncodedJob {
    conditions: serde_json::Value,
    params: serde_json::Value,
    results: serde_json::Value,
}

impl EncodedJob {
    fn new(job: &Job) -> StoreResult<Self> {
        Ok(Self {
            conditions: encode("conditions", &job.conditions)?,
            params: encode("params", &job.params)?,
            results: encode("results", &job.results)?,
        })
    }
}

pub(crate) fn encode<T: serde::Serialize>(
    field: &'static str,
    value: &T,
) -> StoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|source| StoreError::Encode { field, source })
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    cron_job_id: Option<i64>,
    scope: String,
    watcher: String,
    name: String,
    schedule: String,
    concurrency_policy: String,
    suspend: bool,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
    conditions: serde_json::Value,
    params: serde_json::Value,
    results: serde_json::Value,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |message: String| StoreError::Corrupt { id, message };

        let status: JobStatus = row.status.parse().map_err(|e| corrupt(format!("status: {}", e)))?;
        let concurrency_policy: ConcurrencyPolicy = row
            .concurrency_policy
            .parse()
            .map_err(|e| corrupt(format!("concurrency_policy: {}", e)))?;
        let conditions = serde_json::from_value(row.conditions)
            .map_err(|e| corrupt(format!("conditions: {}", e)))?;

        // Params and results of unknown kinds read back as empty
        let params = serde_json::from_value(row.params).unwrap_or_default();
        let results = serde_json::from_value(row.results).unwrap_or_default();

        Ok(Job {
            id,
            cron_job_id: row.cron_job_id,
            scope: row.scope,
            watcher: row.watcher,
            name: row.name,
            schedule: row.schedule,
            concurrency_policy,
            suspend: row.suspend,
            status,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            conditions,
            params,
            results,
        })
    }
}

//! CronJob Store
//!
//! Handles all database operations related to cron templates.

use async_trait::async_trait;
use cadence_core::domain::{ConcurrencyPolicy, CronJob, CronJobStatus};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::job::encode;
use super::{CronJobFilter, CronJobStore};
use crate::error::{StoreError, StoreResult};

const CRON_JOB_COLUMNS: &str = r#"
    id, user_id, scope, name, description, schedule, concurrency_policy, suspend,
    success_history_limit, failed_history_limit, job_template, status, created_at
"#;

#[derive(Clone)]
pub struct PgCronJobStore {
    pool: PgPool,
}

impl PgCronJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, filter: &CronJobFilter, limit: Option<i64>) -> StoreResult<Vec<CronJob>> {
        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM cron_jobs", CRON_JOB_COLUMNS));
        push_filter(&mut query, filter);
        query.push(" ORDER BY id DESC");
        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit);
        }

        let rows = query
            .build_query_as::<CronJobRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(CronJob::try_from).collect()
    }
}

#[async_trait]
impl CronJobStore for PgCronJobStore {
    async fn create(&self, cron_job: &mut CronJob) -> StoreResult<()> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO cron_jobs (user_id, scope, name, description, schedule, concurrency_policy,
                                   suspend, success_history_limit, failed_history_limit,
                                   job_template, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(&cron_job.user_id)
        .bind(&cron_job.scope)
        .bind(&cron_job.name)
        .bind(&cron_job.description)
        .bind(&cron_job.schedule)
        .bind(cron_job.concurrency_policy.as_str())
        .bind(cron_job.suspend)
        .bind(limit_to_db(cron_job.success_history_limit))
        .bind(limit_to_db(cron_job.failed_history_limit))
        .bind(encode("job_template", &cron_job.job_template)?)
        .bind(encode("status", &cron_job.status)?)
        .bind(cron_job.created_at)
        .fetch_one(&self.pool)
        .await?;

        cron_job.id = id;
        Ok(())
    }

    async fn update(&self, cron_job: &CronJob) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE cron_jobs
            SET user_id = $2, scope = $3, name = $4, description = $5, schedule = $6,
                concurrency_policy = $7, suspend = $8, success_history_limit = $9,
                failed_history_limit = $10, job_template = $11, status = $12
            WHERE id = $1
            "#,
        )
        .bind(cron_job.id)
        .bind(&cron_job.user_id)
        .bind(&cron_job.scope)
        .bind(&cron_job.name)
        .bind(&cron_job.description)
        .bind(&cron_job.schedule)
        .bind(cron_job.concurrency_policy.as_str())
        .bind(cron_job.suspend)
        .bind(limit_to_db(cron_job.success_history_limit))
        .bind(limit_to_db(cron_job.failed_history_limit))
        .bind(encode("job_template", &cron_job.job_template)?)
        .bind(encode("status", &cron_job.status)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "cron job",
                id: cron_job.id,
            });
        }

        Ok(())
    }

    async fn update_status(&self, id: i64, status: &CronJobStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE cron_jobs SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(encode("status", status)?)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "cron job",
                id,
            });
        }

        Ok(())
    }

    async fn delete(&self, filter: &CronJobFilter) -> StoreResult<u64> {
        let mut query = QueryBuilder::<Postgres>::new("DELETE FROM cron_jobs");
        push_filter(&mut query, filter);

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, filter: &CronJobFilter) -> StoreResult<Option<CronJob>> {
        Ok(self.fetch(filter, Some(1)).await?.into_iter().next())
    }

    async fn list(&self, filter: &CronJobFilter) -> StoreResult<(u64, Vec<CronJob>)> {
        let cron_jobs = self.fetch(filter, None).await?;
        Ok((cron_jobs.len() as u64, cron_jobs))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &CronJobFilter) {
    query.push(" WHERE TRUE");

    if let Some(ids) = &filter.ids {
        query.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(suspend) = filter.suspend {
        query.push(" AND suspend = ").push_bind(suspend);
    }
}

fn limit_to_db(limit: u32) -> i32 {
    i32::try_from(limit).unwrap_or(i32::MAX)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct CronJobRow {
    id: i64,
    user_id: String,
    scope: String,
    name: String,
    description: String,
    schedule: String,
    concurrency_policy: String,
    suspend: bool,
    success_history_limit: i32,
    failed_history_limit: i32,
    job_template: serde_json::Value,
    status: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<CronJobRow> for CronJob {
    type Error = StoreError;

    fn try_from(row: CronJobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |message: String| StoreError::Corrupt { id, message };

        let concurrency_policy: ConcurrencyPolicy = row
            .concurrency_policy
            .parse()
            .map_err(|e| corrupt(format!("concurrency_policy: {}", e)))?;
        let job_template = serde_json::from_value(row.job_template)
            .map_err(|e| corrupt(format!("job_template: {}", e)))?;
        // The status is a cache; a stale shape is rebuilt by the next sync
        let status = serde_json::from_value(row.status).unwrap_or_default();

        Ok(CronJob {
            id,
            user_id: row.user_id,
            scope: row.scope,
            name: row.name,
            description: row.description,
            schedule: row.schedule,
            concurrency_policy,
            suspend: row.suspend,
            success_history_limit: u32::try_from(row.success_history_limit).unwrap_or(0),
            failed_history_limit: u32::try_from(row.failed_history_limit).unwrap_or(0),
            job_template,
            status,
            created_at: row.created_at,
        })
    }
}

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create cron templates table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cron_jobs (
            id BIGSERIAL PRIMARY KEY,
            user_id VARCHAR(255) NOT NULL,
            scope VARCHAR(255) NOT NULL DEFAULT '',
            name VARCHAR(255) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            schedule VARCHAR(255) NOT NULL,
            concurrency_policy VARCHAR(50) NOT NULL DEFAULT 'Allow',
            suspend BOOLEAN NOT NULL DEFAULT FALSE,
            success_history_limit INTEGER NOT NULL DEFAULT 3,
            failed_history_limit INTEGER NOT NULL DEFAULT 1,
            job_template JSONB NOT NULL,
            status JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id BIGSERIAL PRIMARY KEY,
            cron_job_id BIGINT REFERENCES cron_jobs(id) ON DELETE SET NULL,
            scope VARCHAR(255) NOT NULL DEFAULT '',
            watcher VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            schedule VARCHAR(255) NOT NULL DEFAULT '',
            concurrency_policy VARCHAR(50) NOT NULL DEFAULT 'Allow',
            suspend BOOLEAN NOT NULL DEFAULT FALSE,
            status VARCHAR(50) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            ended_at TIMESTAMPTZ,
            conditions JSONB NOT NULL DEFAULT '[]',
            params JSONB NOT NULL DEFAULT '{}',
            results JSONB NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for watcher polling
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_watcher_status ON jobs(watcher, status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_cron_job_id ON jobs(cron_job_id, id DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cron_jobs_suspend ON cron_jobs(suspend)")
        .execute(pool)
        .await?;

    // Create leader lease table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_locks (
            key VARCHAR(255) PRIMARY KEY,
            holder VARCHAR(255) NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

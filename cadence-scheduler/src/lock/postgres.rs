use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use super::LeaseBackend;
use crate::error::LockError;

/// Leases stored as rows of `scheduler_locks`
///
/// A row is free once `expires_at` has passed. Expiry is judged by the
/// database clock so holders on different hosts agree.
#[derive(Clone)]
pub struct PgLeaseBackend {
    pool: PgPool,
}

impl PgLeaseBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseBackend for PgLeaseBackend {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LockError> {
        let acquired: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO scheduler_locks (key, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
            SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE scheduler_locks.expires_at < NOW()
               OR scheduler_locks.holder = EXCLUDED.holder
            RETURNING holder
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.is_some())
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LockError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduler_locks
            SET expires_at = NOW() + make_interval(secs => $3)
            WHERE key = $1 AND holder = $2 AND expires_at >= NOW()
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool, LockError> {
        let result = sqlx::query("DELETE FROM scheduler_locks WHERE key = $1 AND holder = $2")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

//! Shared cache/lock store on an UNLOGGED Postgres table.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use time::OffsetDateTime;

use crate::cache::{CacheEntry, CacheError, CacheStore};

#[derive(sqlx::FromRow)]
struct EntryRow {
    payload: String,
    created_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct PostgresCacheStore {
    pool: PgPool,
}

impl PostgresCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PostgresCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query_as::<_, EntryRow>(
            "SELECT payload, created_at, expires_at FROM cache_entries WHERE key = $1 AND expires_at > $2",
        )
        .bind(key)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&self.pool)
        .await
        .map_err(CacheError::backend)?;

        Ok(row.map(|row| CacheEntry {
            payload: row.payload,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }))
    }

    async fn put(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(payload, ttl);
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, payload, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE
            SET payload = EXCLUDED.payload,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(&entry.payload)
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await
        .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        payload: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let entry = CacheEntry::new(payload, ttl);
        // A single statement: the row lock taken by ON CONFLICT makes this
        // atomic across processes. Expired rows are overwritten.
        let written: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO cache_entries (key, payload, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE
            SET payload = EXCLUDED.payload,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE cache_entries.expires_at <= EXCLUDED.created_at
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(&entry.payload)
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(CacheError::backend)?;
        Ok(written.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, CacheError> {
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE key = $1 AND payload = $2 AND expires_at > $3",
        )
        .bind(key)
        .bind(token)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await
        .map_err(CacheError::backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= $1")
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await
            .map_err(CacheError::backend)?;
        Ok(result.rows_affected())
    }
}

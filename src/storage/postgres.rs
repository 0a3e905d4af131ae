//! PostgreSQL backend: one table per entity, attributes and document as JSONB.

use super::{PersistenceEnvelope, Store, StoreError, StoreFuture};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    PgPool, Row,
};
use std::time::Duration;
use tracing::Instrument;

pub const TABLE_APP: &str = "exter_app";
pub const TABLE_USER: &str = "exter_user";
pub const TABLE_SESSION: &str = "exter_session";

/// Connect a pool sized for the API server.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn connect(dsn: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await?;
    Ok(pool)
}

fn span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    table: &'static str,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool, table: &'static str) -> Self {
        Self { pool, table }
    }

    /// Create the backing table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let query = format!(
            r"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                checksum TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                attrs JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                data JSONB NOT NULL DEFAULT 'null'::jsonb
            )",
            table = self.table
        );
        sqlx::query(&query)
            .execute(&self.pool)
            .instrument(span("CREATE", &query))
            .await?;
        Ok(())
    }
}

fn attrs_of(record: &PersistenceEnvelope) -> Json<Map<String, Value>> {
    Json(record.attrs().clone())
}

fn envelope_from_row(row: &PgRow) -> Result<PersistenceEnvelope, StoreError> {
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    let Json(attrs): Json<Map<String, Value>> = row.try_get("attrs")?;
    let Json(data): Json<Value> = row.try_get("data")?;
    Ok(PersistenceEnvelope::from_parts(
        row.try_get("id")?,
        row.try_get("checksum")?,
        created_at,
        updated_at,
        attrs,
        data,
    ))
}

impl Store for PgStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<PersistenceEnvelope>> {
        Box::pin(async move {
            let query = format!(
                "SELECT id, checksum, created_at, updated_at, attrs, data FROM {} WHERE id = $1",
                self.table
            );
            let row = sqlx::query(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(span("SELECT", &query))
                .await?;

            row.as_ref().map(envelope_from_row).transpose()
        })
    }

    fn create<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = format!(
                r"INSERT INTO {} (id, checksum, created_at, updated_at, attrs, data)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO NOTHING",
                self.table
            );
            let result = sqlx::query(&query)
                .bind(record.id())
                .bind(record.checksum())
                .bind(record.created_at())
                .bind(record.updated_at())
                .bind(attrs_of(record))
                .bind(Json(record.data()))
                .execute(&self.pool)
                .instrument(span("INSERT", &query))
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(record.id().to_string()));
            }
            Ok(())
        })
    }

    fn save<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = format!(
                r"INSERT INTO {} (id, checksum, created_at, updated_at, attrs, data)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE SET
                    checksum = EXCLUDED.checksum,
                    updated_at = EXCLUDED.updated_at,
                    attrs = EXCLUDED.attrs,
                    data = EXCLUDED.data",
                self.table
            );
            sqlx::query(&query)
                .bind(record.id())
                .bind(record.checksum())
                .bind(record.created_at())
                .bind(record.updated_at())
                .bind(attrs_of(record))
                .bind(Json(record.data()))
                .execute(&self.pool)
                .instrument(span("UPSERT", &query))
                .await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, record: &'a PersistenceEnvelope) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let query = format!("DELETE FROM {} WHERE id = $1", self.table);
            let result = sqlx::query(&query)
                .bind(record.id())
                .execute(&self.pool)
                .instrument(span("DELETE", &query))
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn find_by_attr<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> StoreFuture<'a, Vec<PersistenceEnvelope>> {
        Box::pin(async move {
            let query = format!(
                r"SELECT id, checksum, created_at, updated_at, attrs, data FROM {}
                WHERE attrs ->> $1 = $2 AND jsonb_typeof(attrs -> $1) = 'string'
                ORDER BY id",
                self.table
            );
            let rows = sqlx::query(&query)
                .bind(key)
                .bind(value)
                .fetch_all(&self.pool)
                .instrument(span("SELECT", &query))
                .await?;
            rows.iter().map(envelope_from_row).collect()
        })
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

//! Postgres-backed queue store.
//!
//! Documents live in a single `cascade_options` table keyed by name, the same
//! shape as a generic options table.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    Row,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::cascade::{QueueStore, StoreError};

use super::error::InfraError;

const UPSERT_SQL: &str = "INSERT INTO cascade_options (name, value, updated_at) \
    VALUES ($1, $2, now()) \
    ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, updated_at = now()";
const SELECT_SQL: &str = "SELECT value FROM cascade_options WHERE name = $1";
const DELETE_SQL: &str = "DELETE FROM cascade_options WHERE name = $1";

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

#[derive(Clone)]
pub struct PgQueueStore {
    pool: Arc<PgPool>,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, InfraError> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(InfraError::from)
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), InfraError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(InfraError::from)
    }

    pub async fn health_check(&self) -> Result<(), InfraError> {
        query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(InfraError::from)
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row = query(SELECT_SQL)
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(|row| row.try_get::<Value, _>("value"))
            .transpose()
            .map_err(map_sqlx_error)
    }

    async fn save(&self, key: &str, document: Value) -> Result<(), StoreError> {
        query(UPSERT_SQL)
            .bind(key)
            .bind(document)
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        query(DELETE_SQL)
            .bind(key)
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

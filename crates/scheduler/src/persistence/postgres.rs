//! PostgreSQL implementation of StateStore and TimerStore
//!
//! One row per link in `scheduler_state` and, while a fire is pending, one
//! in `scheduler_timers`. Writes are single statements, so a returned call
//! is committed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use super::store::*;
use crate::model::ClickEvent;

/// PostgreSQL implementation of StateStore
///
/// # Example
///
/// ```ignore
/// use linkeval_scheduler::PostgresStateStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/linkeval").await?;
/// let store = PostgresStateStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `url`
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run scheduler migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    #[instrument(skip(self))]
    async fn get(&self, link_id: &str) -> Result<Option<ClickEvent>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT payload FROM scheduler_state
            WHERE link_id = $1 AND storage_key = $2
            "#,
        )
        .bind(link_id)
        .bind(CLICK_DATA_KEY)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load click data: {}", e);
            StoreError::Database(e.to_string())
        })?;

        match row {
            Some(row) => {
                let payload: serde_json::Value = row.get("payload");
                Ok(Some(serde_json::from_value(payload)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, event))]
    async fn put(&self, link_id: &str, event: &ClickEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_value(event)?;

        sqlx::query(
            r#"
            INSERT INTO scheduler_state (link_id, storage_key, payload, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (link_id) DO UPDATE
            SET storage_key = EXCLUDED.storage_key,
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(link_id)
        .bind(CLICK_DATA_KEY)
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save click data: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(%link_id, "saved click data");
        Ok(())
    }
}

#[async_trait]
impl TimerStore for PostgresStateStore {
    #[instrument(skip(self))]
    async fn save_timer(&self, link_id: &str, fire_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_timers (link_id, fire_at)
            VALUES ($1, $2)
            ON CONFLICT (link_id) DO UPDATE
            SET fire_at = EXCLUDED.fire_at
            "#,
        )
        .bind(link_id)
        .bind(fire_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save timer: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_timer(
        &self,
        link_id: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM scheduler_timers
            WHERE link_id = $1 AND fire_at = $2
            "#,
        )
        .bind(link_id)
        .bind(fire_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to delete timer: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn load_timers(&self) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let rows = sqlx::query("SELECT link_id, fire_at FROM scheduler_timers")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to load timers: {}", e);
                StoreError::Database(e.to_string())
            })?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("link_id"), row.get("fire_at")))
            .collect())
    }
}

//! StateStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::ClickEvent;

/// Storage key the latest click is kept under
pub const CLICK_DATA_KEY: &str = "click_data";

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Durable store for the latest click of each link
///
/// Each link id owns exactly one record. Implementations must not return
/// from [`put`](StateStore::put) before the write is durable.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Load the latest click for a link, if one was ever written
    async fn get(&self, link_id: &str) -> Result<Option<ClickEvent>, StoreError>;

    /// Overwrite the latest click for a link
    async fn put(&self, link_id: &str, event: &ClickEvent) -> Result<(), StoreError>;
}

/// Durable record of armed timers, one row per link
///
/// Kept apart from the click records so a restart can re-arm every
/// pending fire without reading any click.
#[async_trait]
pub trait TimerStore: Send + Sync + 'static {
    /// Record that the link's timer fires at `fire_at`, replacing any previous row
    async fn save_timer(&self, link_id: &str, fire_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete the link's row only if it still fires at `fire_at`
    ///
    /// Returns whether a row was deleted.
    async fn delete_timer(&self, link_id: &str, fire_at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Every persisted timer
    async fn load_timers(&self) -> Result<Vec<(String, DateTime<Utc>)>, StoreError>;
}

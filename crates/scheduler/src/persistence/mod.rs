//! Persistence layer for scheduler state
//!
//! This module provides:
//! - [`StateStore`] trait for the latest-click record of each link
//! - [`TimerStore`] trait for the armed timer of each link
//! - [`InMemoryStateStore`] for testing and database-less runs
//! - [`PostgresStateStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryStateStore;
pub use postgres::PostgresStateStore;
pub use store::{StateStore, StoreError, TimerStore, CLICK_DATA_KEY};

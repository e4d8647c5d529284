//! Storage providers for throne.
//!
//! This crate provides:
//! - The shared data model (matches, predictions, users, stages, teams)
//! - The `Store` trait the cache layer reads and writes through
//! - A SQLite store with a single serialized connection
//! - An in-memory store for tests and throwaway instances
//! - The textual timestamp codec used at the store boundary

mod error;
pub mod memory;
pub mod sqlite;
mod timestamp;
mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, StoreStats};
pub use sqlite::SqliteStore;
pub use timestamp::{TIMESTAMP_FORMAT, format_timestamp, parse_timestamp};
pub use types::*;

/// A match about to be inserted. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub teams: [String; 2],
    pub date: DateTime<Utc>,
    pub result: String,
}

/// A stage about to be inserted.
#[derive(Debug, Clone)]
pub struct NewStage {
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Backing store for every collection the cache layer serves.
///
/// Implementations must make a write visible to subsequent reads before the
/// write call returns; callers invalidate their caches right after.
#[async_trait]
pub trait Store: Send + Sync {
    /// All matches, ordered by ascending start time.
    async fn list_matches(&self) -> StoreResult<Vec<Match>>;

    /// Predictions attached to any of the given matches, in no particular order.
    async fn list_predictions_for_matches(&self, match_ids: &[i64]) -> StoreResult<Vec<Prediction>>;

    /// Insert a match and return its id.
    async fn insert_match(&self, new: &NewMatch) -> StoreResult<i64>;

    /// Apply a partial update and return the number of rows affected.
    async fn update_match(&self, id: i64, patch: &MatchPatch) -> StoreResult<usize>;

    async fn get_prediction(&self, user_id: i64, match_id: i64) -> StoreResult<Option<Prediction>>;

    async fn insert_prediction(&self, prediction: &Prediction) -> StoreResult<()>;

    async fn update_prediction(&self, prediction: &Prediction) -> StoreResult<()>;

    async fn list_users(&self) -> StoreResult<Vec<User>>;

    /// Look up a user by lowercase login and password digest.
    async fn find_user(&self, login: &str, password_digest: &str) -> StoreResult<Option<User>>;

    /// Insert a user and return its id.
    async fn insert_user(&self, user: &NewUser) -> StoreResult<i64>;

    /// All stages, ordered by start date.
    async fn list_stages(&self) -> StoreResult<Vec<Stage>>;

    /// Insert a stage and return its id.
    async fn insert_stage(&self, stage: &NewStage) -> StoreResult<i64>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

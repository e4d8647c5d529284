//! Error types for the caching core.

use std::sync::Arc;

use thiserror::Error;
use throne_store::StoreError;

/// A failed snapshot load.
///
/// Every caller waiting on the same load receives a clone of the same error.
#[derive(Debug, Clone, Error)]
#[error("failed to load {collection}: {source}")]
pub struct CacheError {
    pub collection: &'static str,
    #[source]
    pub source: Arc<StoreError>,
}

impl CacheError {
    /// The underlying store failure.
    pub fn store_error(&self) -> &StoreError {
        &self.source
    }
}

/// Errors returned by the aggregator and the user directory.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input rejected before reaching the store.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown match, no row updated, or bad credentials.
    #[error("not found: {0}")]
    NotFound(String),

    /// Predictions are closed once a match starts.
    #[error("match {0} has already started")]
    MatchStarted(i64),

    /// Store write or lookup failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Snapshot load failed.
    #[error(transparent)]
    Load(#[from] CacheError),
}

pub type CoreResult<T> = Result<T, CoreError>;

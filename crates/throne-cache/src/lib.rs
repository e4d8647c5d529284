//! Read-through caching core for throne.
//!
//! This crate provides:
//! - `EntityCache`: a lazily populated, invalidatable snapshot of one collection
//! - `MatchAggregator`: the match view with the prediction visibility rule,
//!   plus match, prediction and stage writes
//! - `UserDirectory`: cached users and credential checks
//!
//! Every write goes to the store first and invalidates the affected cache only
//! after the store acknowledged it.

mod aggregator;
pub mod cache;
mod clock;
mod error;
mod users;

pub use aggregator::{MatchAggregator, SaveOutcome, validate_score, visible_prediction};
pub use cache::{Caches, EntityCache, Snapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, CoreError, CoreResult};
pub use users::{PasswordDigester, UserDirectory};

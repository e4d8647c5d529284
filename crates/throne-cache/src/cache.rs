//! Lazily populated snapshot cache for a single collection.
//!
//! The `EntityCache` maintains:
//! - One shared snapshot of the whole collection, or nothing
//! - A generation counter bumped by every invalidation
//! - At most one in-flight load per generation
//!
//! Readers first check an atomic "present" flag and only then take a short
//! read lock to clone the shared handle. On a miss, callers either join the
//! load already running for the current generation or start one. A load only
//! installs its result if no invalidation happened since it started.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use throne_store::{Match, Prediction, Stage, StoreResult, User};

use crate::error::CacheError;

/// Read-only view of a cached collection.
///
/// Cloning is cheap and shares the same backing storage, so elements are only
/// reachable through `&T`. Callers that need to modify elements take a deep
/// copy with [`Snapshot::to_vec`].
pub struct Snapshot<T>(Arc<[T]>);

impl<T> Snapshot<T> {
    /// Whether two snapshots share the same backing storage.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: Clone> Snapshot<T> {
    /// Deep copy of the elements, safe to mutate.
    pub fn to_vec(&self) -> Vec<T> {
        self.0.to_vec()
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> From<Vec<T>> for Snapshot<T> {
    fn from(items: Vec<T>) -> Self {
        Self(items.into())
    }
}

impl<T: fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<T: PartialEq> PartialEq for Snapshot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

/// A single load, shared by every caller that arrives while it runs.
struct Attempt<T> {
    /// Generation the load started under.
    generation: u64,
    result: OnceCell<Result<Snapshot<T>, CacheError>>,
}

struct Slot<T> {
    generation: u64,
    snapshot: Option<Snapshot<T>>,
}

/// Cache for one collection of entities.
pub struct EntityCache<T> {
    /// Collection name, used in errors and logs.
    name: &'static str,

    /// Lock-free hint that `slot.snapshot` is populated.
    present: AtomicBool,

    /// Current snapshot and generation.
    slot: RwLock<Slot<T>>,

    /// Load running for the current generation, if any.
    inflight: Mutex<Option<Arc<Attempt<T>>>>,

    /// Number of loads actually executed.
    loads: AtomicU64,
}

impl<T> EntityCache<T> {
    /// Create an empty cache.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            present: AtomicBool::new(false),
            slot: RwLock::new(Slot {
                generation: 0,
                snapshot: None,
            }),
            inflight: Mutex::new(None),
            loads: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current generation. Starts at 0 and grows by one per invalidation.
    pub fn generation(&self) -> u64 {
        self.slot.read().generation
    }

    /// Number of loads executed so far.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn is_populated(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    /// The cached snapshot, without loading.
    pub fn peek(&self) -> Option<Snapshot<T>> {
        if !self.present.load(Ordering::Acquire) {
            return None;
        }
        self.slot.read().snapshot.clone()
    }

    /// Drop the cached snapshot. The next `get` reloads.
    ///
    /// Loads that started before this call will not install their result.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write();
        slot.generation += 1;
        slot.snapshot = None;
        self.present.store(false, Ordering::Release);
        trace!(cache = self.name, generation = slot.generation, "cache invalidated");
    }

    /// Return the cached snapshot, loading it with `load` on a miss.
    ///
    /// Concurrent callers on a miss share one call to `load` and all receive
    /// its outcome. A failed load is not cached.
    pub async fn get<F, Fut>(&self, load: F) -> Result<Snapshot<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<Vec<T>>>,
    {
        if let Some(snapshot) = self.peek() {
            return Ok(snapshot);
        }

        let attempt = {
            let mut inflight = self.inflight.lock();
            let slot = self.slot.read();
            if let Some(snapshot) = &slot.snapshot {
                return Ok(snapshot.clone());
            }
            match inflight.as_ref() {
                Some(attempt) if attempt.generation == slot.generation => Arc::clone(attempt),
                _ => {
                    let attempt = Arc::new(Attempt {
                        generation: slot.generation,
                        result: OnceCell::new(),
                    });
                    *inflight = Some(Arc::clone(&attempt));
                    attempt
                }
            }
        };

        let result = attempt
            .result
            .get_or_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                debug!(cache = self.name, generation = attempt.generation, "loading snapshot");
                load()
                    .await
                    .map(Snapshot::from)
                    .map_err(|source| CacheError {
                        collection: self.name,
                        source: Arc::new(source),
                    })
            })
            .await
            .clone();

        self.finish(&attempt, &result);
        result
    }

    /// Retire a completed attempt and install its snapshot if still current.
    fn finish(&self, attempt: &Arc<Attempt<T>>, result: &Result<Snapshot<T>, CacheError>) {
        let mut inflight = self.inflight.lock();
        if inflight
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, attempt))
        {
            *inflight = None;
        }

        let Ok(snapshot) = result else {
            return;
        };

        let mut slot = self.slot.write();
        if slot.generation != attempt.generation {
            debug!(
                cache = self.name,
                started = attempt.generation,
                current = slot.generation,
                "discarding stale snapshot"
            );
            return;
        }
        if slot.snapshot.is_none() {
            slot.snapshot = Some(snapshot.clone());
            self.present.store(true, Ordering::Release);
            trace!(cache = self.name, items = snapshot.len(), "snapshot installed");
        }
    }
}

impl<T> fmt::Debug for EntityCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("name", &self.name)
            .field("generation", &self.generation())
            .field("populated", &self.is_populated())
            .field("loads", &self.load_count())
            .finish()
    }
}

/// One cache per collection, shared by whoever composes the service.
#[derive(Debug, Clone)]
pub struct Caches {
    pub matches: Arc<EntityCache<Match>>,
    pub predictions: Arc<EntityCache<Prediction>>,
    pub users: Arc<EntityCache<User>>,
    pub stages: Arc<EntityCache<Stage>>,
}

impl Caches {
    pub fn new() -> Self {
        Self {
            matches: Arc::new(EntityCache::new("matches")),
            predictions: Arc::new(EntityCache::new("predictions")),
            users: Arc::new(EntityCache::new("users")),
            stages: Arc::new(EntityCache::new("stages")),
        }
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new()
    }
}

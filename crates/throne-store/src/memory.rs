//! In-memory store.
//!
//! Holds every collection in plain vectors behind a `tokio::sync::RwLock`.
//! Nothing survives a restart. Used by tests, where it also records how often
//! each collection was loaded and can be told to fail or stall loads.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::{Match, MatchPatch, NewMatch, NewStage, NewUser, Prediction, Stage, Store, User};

/// Counters of calls made against a `MemoryStore`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub match_loads: usize,
    pub prediction_loads: usize,
    pub user_loads: usize,
    pub stage_loads: usize,
    pub writes: usize,
}

#[derive(Default)]
struct Tables {
    matches: Vec<Match>,
    predictions: Vec<Prediction>,
    users: Vec<(User, String)>,
    stages: Vec<Stage>,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
    match_loads: AtomicUsize,
    prediction_loads: AtomicUsize,
    user_loads: AtomicUsize,
    stage_loads: AtomicUsize,
    writes: AtomicUsize,
    fail_loads: AtomicBool,
    load_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            match_loads: self.match_loads.load(Ordering::SeqCst),
            prediction_loads: self.prediction_loads.load(Ordering::SeqCst),
            user_loads: self.user_loads.load(Ordering::SeqCst),
            stage_loads: self.stage_loads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
        }
    }

    /// Make every list call fail until switched off again.
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Stall every list call for `delay` before it reads.
    pub fn set_load_delay(&self, delay: Duration) {
        self.load_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of stored predictions, for upsert assertions.
    pub async fn prediction_rows(&self) -> usize {
        self.tables.read().await.predictions.len()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1
    }

    async fn begin_load(&self, counter: &AtomicUsize) -> StoreResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Task("injected load failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_matches(&self) -> StoreResult<Vec<Match>> {
        self.begin_load(&self.match_loads).await?;
        let mut matches = self.tables.read().await.matches.clone();
        matches.sort_by_key(|m| (m.date, m.id));
        Ok(matches)
    }

    async fn list_predictions_for_matches(&self, match_ids: &[i64]) -> StoreResult<Vec<Prediction>> {
        self.begin_load(&self.prediction_loads).await?;
        let tables = self.tables.read().await;
        Ok(tables
            .predictions
            .iter()
            .filter(|p| match_ids.contains(&p.match_id))
            .cloned()
            .collect())
    }

    async fn insert_match(&self, new: &NewMatch) -> StoreResult<i64> {
        let id = self.next_id();
        self.tables.write().await.matches.push(Match {
            id,
            teams: new.teams.clone(),
            date: new.date,
            result: new.result.clone(),
            predictions: Vec::new(),
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn update_match(&self, id: i64, patch: &MatchPatch) -> StoreResult<usize> {
        if patch.is_empty() {
            return Ok(0);
        }
        let mut tables = self.tables.write().await;
        match tables.matches.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                patch.apply_to(m);
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn get_prediction(&self, user_id: i64, match_id: i64) -> StoreResult<Option<Prediction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .predictions
            .iter()
            .find(|p| p.user_id == user_id && p.match_id == match_id)
            .cloned())
    }

    async fn insert_prediction(&self, prediction: &Prediction) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables
            .predictions
            .iter()
            .any(|p| p.user_id == prediction.user_id && p.match_id == prediction.match_id)
        {
            return Err(StoreError::Conflict(format!(
                "prediction exists for user {} match {}",
                prediction.user_id, prediction.match_id
            )));
        }
        tables.predictions.push(prediction.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_prediction(&self, prediction: &Prediction) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(p) = tables
            .predictions
            .iter_mut()
            .find(|p| p.user_id == prediction.user_id && p.match_id == prediction.match_id)
        {
            p.score = prediction.score.clone();
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.begin_load(&self.user_loads).await?;
        let tables = self.tables.read().await;
        Ok(tables.users.iter().map(|(u, _)| u.clone()).collect())
    }

    async fn find_user(&self, login: &str, password_digest: &str) -> StoreResult<Option<User>> {
        let login = login.to_lowercase();
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|(u, digest)| u.login == login && digest == password_digest)
            .map(|(u, _)| u.clone()))
    }

    async fn insert_user(&self, user: &NewUser) -> StoreResult<i64> {
        let login = user.login.to_lowercase();
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|(u, _)| u.login == login) {
            return Err(StoreError::Conflict(format!("login {} is taken", login)));
        }
        let id = self.next_id();
        tables.users.push((
            User {
                id,
                login,
                name: user.name.clone(),
                is_admin: user.is_admin,
            },
            user.password_digest.clone(),
        ));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn list_stages(&self) -> StoreResult<Vec<Stage>> {
        self.begin_load(&self.stage_loads).await?;
        let mut stages = self.tables.read().await.stages.clone();
        stages.sort_by_key(|s| s.start_date);
        Ok(stages)
    }

    async fn insert_stage(&self, stage: &NewStage) -> StoreResult<i64> {
        let id = self.next_id();
        self.tables.write().await.stages.push(Stage {
            id,
            name: stage.name.clone(),
            start_date: stage.start_date,
            end_date: stage.end_date,
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

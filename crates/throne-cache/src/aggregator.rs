//! Match view aggregation and match/prediction/stage writes.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use tracing::{debug, info};

use throne_store::{
    HIDDEN_SCORE, Match, MatchPatch, NewMatch, NewStage, Prediction, Stage, Store, StoreError,
    StoreResult,
};

use crate::cache::{Caches, EntityCache, Snapshot};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+:\d+$").unwrap());

/// Check that a score looks like `A:B`.
pub fn validate_score(score: &str) -> CoreResult<()> {
    if SCORE_RE.is_match(score) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "score {:?} is not in A:B form",
            score
        )))
    }
}

/// The prediction as `viewer` may see it.
///
/// Before the match starts only the owner sees the real score; everyone else
/// gets the neutral placeholder.
pub fn visible_prediction(
    m: &Match,
    prediction: &Prediction,
    viewer: i64,
    now: DateTime<Utc>,
) -> Prediction {
    if !m.is_started(now) && prediction.user_id != viewer {
        Prediction {
            score: HIDDEN_SCORE.to_string(),
            ..prediction.clone()
        }
    } else {
        prediction.clone()
    }
}

/// What `save_prediction` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Composes matches and predictions and mediates writes to both.
pub struct MatchAggregator {
    store: Arc<dyn Store>,
    matches: Arc<EntityCache<Match>>,
    predictions: Arc<EntityCache<Prediction>>,
    stages: Arc<EntityCache<Stage>>,
    clock: Arc<dyn Clock>,
}

impl MatchAggregator {
    pub fn new(store: Arc<dyn Store>, caches: &Caches, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            matches: Arc::clone(&caches.matches),
            predictions: Arc::clone(&caches.predictions),
            stages: Arc::clone(&caches.stages),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn match_snapshot(&self) -> CoreResult<Snapshot<Match>> {
        Ok(self.matches.get(|| self.store.list_matches()).await?)
    }

    async fn prediction_snapshot(&self) -> CoreResult<Snapshot<Prediction>> {
        Ok(self.predictions.get(|| self.load_predictions()).await?)
    }

    /// Loader for the prediction cache.
    ///
    /// Match ids are read when the load runs, never taken from a caller's
    /// snapshot, which may predate a match insert. A match insert invalidates
    /// both caches, so a load that read ids before it is never installed.
    async fn load_predictions(&self) -> StoreResult<Vec<Prediction>> {
        let ids: Vec<i64> = match self.matches.peek() {
            Some(matches) => matches.iter().map(|m| m.id).collect(),
            None => self
                .store
                .list_matches()
                .await?
                .iter()
                .map(|m| m.id)
                .collect(),
        };
        self.store.list_predictions_for_matches(&ids).await
    }

    /// All matches, oldest first, with predictions attached as `viewer` may see them.
    pub async fn load_matches_view(&self, viewer: i64) -> CoreResult<Vec<Match>> {
        let matches = self.match_snapshot().await?;
        let predictions = self.prediction_snapshot().await?;
        let now = self.clock.now();

        let mut view = matches.to_vec();
        let index: HashMap<i64, usize> = view
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id, i))
            .collect();

        for prediction in predictions.iter() {
            let Some(&i) = index.get(&prediction.match_id) else {
                debug!(match_id = prediction.match_id, "prediction for unknown match skipped");
                continue;
            };
            let shown = visible_prediction(&view[i], prediction, viewer, now);
            view[i].predictions.push(shown);
        }

        Ok(view)
    }

    /// A single match without predictions.
    pub async fn find_match(&self, id: i64) -> CoreResult<Match> {
        let matches = self.match_snapshot().await?;
        matches
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("match {}", id)))
    }

    /// Schedule a new match.
    pub async fn add_match(&self, teams: [String; 2], date: DateTime<Utc>) -> CoreResult<Match> {
        if teams.iter().any(|t| t.is_empty()) {
            return Err(CoreError::Validation("a match needs two teams".to_string()));
        }

        // The store keeps whole seconds.
        let date = date.trunc_subsecs(0);
        let new = NewMatch {
            teams,
            date,
            result: String::new(),
        };
        let id = self.store.insert_match(&new).await?;
        self.matches.invalidate();
        self.predictions.invalidate();

        info!(id, teams = ?new.teams, %date, "match added");
        Ok(Match {
            id,
            teams: new.teams,
            date: new.date,
            result: new.result,
            predictions: Vec::new(),
        })
    }

    /// Apply a partial update to a match.
    pub async fn save_match(&self, id: i64, mut patch: MatchPatch) -> CoreResult<()> {
        if id == 0 {
            return Err(CoreError::Validation("match id is required".to_string()));
        }
        if patch.is_empty() {
            return Err(CoreError::Validation("nothing to update".to_string()));
        }
        if let Some(result) = &patch.result {
            validate_score(result)?;
        }
        patch.date = patch.date.map(|d| d.trunc_subsecs(0));

        let affected = self.store.update_match(id, &patch).await?;
        if affected == 0 {
            return Err(CoreError::NotFound(format!("match {}", id)));
        }
        self.matches.invalidate();

        info!(id, ?patch, "match saved");
        Ok(())
    }

    /// Insert, update or keep a user's prediction for a match.
    ///
    /// Does not check whether the match has started; see `submit_prediction`.
    pub async fn save_prediction(
        &self,
        user_id: i64,
        match_id: i64,
        score: &str,
    ) -> CoreResult<SaveOutcome> {
        if user_id == 0 {
            return Err(CoreError::Validation("user id is required".to_string()));
        }
        if match_id == 0 {
            return Err(CoreError::Validation("match id is required".to_string()));
        }
        validate_score(score)?;

        let prediction = Prediction {
            user_id,
            match_id,
            score: score.to_string(),
        };

        let outcome = match self.store.get_prediction(user_id, match_id).await? {
            Some(existing) if existing.score == prediction.score => SaveOutcome::Unchanged,
            Some(_) => {
                self.store.update_prediction(&prediction).await?;
                SaveOutcome::Updated
            }
            None => match self.store.insert_prediction(&prediction).await {
                Ok(()) => SaveOutcome::Inserted,
                // Lost a race with a concurrent insert for the same pair.
                Err(StoreError::Conflict(_)) => {
                    self.store.update_prediction(&prediction).await?;
                    SaveOutcome::Updated
                }
                Err(e) => return Err(e.into()),
            },
        };

        if outcome != SaveOutcome::Unchanged {
            self.predictions.invalidate();
        }
        debug!(user_id, match_id, ?outcome, "prediction saved");
        Ok(outcome)
    }

    /// Accept a prediction only while its match has not started.
    pub async fn submit_prediction(
        &self,
        user_id: i64,
        match_id: i64,
        score: &str,
    ) -> CoreResult<SaveOutcome> {
        let m = self.find_match(match_id).await?;
        if m.is_started(self.clock.now()) {
            return Err(CoreError::MatchStarted(match_id));
        }
        self.save_prediction(user_id, match_id, score).await
    }

    pub fn invalidate_matches(&self) {
        self.matches.invalidate();
    }

    pub fn invalidate_predictions(&self) {
        self.predictions.invalidate();
    }

    /// All stages, ordered by start date.
    pub async fn list_stages(&self) -> CoreResult<Snapshot<Stage>> {
        Ok(self.stages.get(|| self.store.list_stages()).await?)
    }

    /// The stage running right now, if any.
    pub async fn current_stage(&self) -> CoreResult<Option<Stage>> {
        let now = self.clock.now();
        let stages = self.list_stages().await?;
        Ok(stages.iter().find(|s| s.contains(now)).cloned())
    }

    pub async fn add_stage(
        &self,
        name: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> CoreResult<Stage> {
        if name.is_empty() {
            return Err(CoreError::Validation("stage name is required".to_string()));
        }
        if end_date < start_date {
            return Err(CoreError::Validation(
                "stage ends before it starts".to_string(),
            ));
        }

        let (start_date, end_date) = (start_date.trunc_subsecs(0), end_date.trunc_subsecs(0));
        let new = NewStage {
            name: name.to_string(),
            start_date,
            end_date,
        };
        let id = self.store.insert_stage(&new).await?;
        self.stages.invalidate();

        Ok(Stage {
            id,
            name: new.name,
            start_date,
            end_date,
        })
    }
}

//! Core types shared by the store, the cache layer and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Score shown to other users for a prediction on a match that has not started.
pub const HIDDEN_SCORE: &str = "0:0";

/// A scheduled match between two teams.
///
/// `predictions` is never persisted. It is filled in per request by the
/// aggregator and is empty on rows coming straight from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: i64,
    pub teams: [String; 2],
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub predictions: Vec<Prediction>,
}

/// Derived lifecycle of a match. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchState {
    /// Start time is still in the future.
    Scheduled,
    /// Start time has passed, no result recorded yet.
    Started,
    /// A result has been recorded.
    Completed,
}

impl Match {
    /// Whether the match has started at `now`.
    pub fn is_started(&self, now: DateTime<Utc>) -> bool {
        self.date <= now
    }

    /// The derived state of the match at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> MatchState {
        if !self.is_started(now) {
            MatchState::Scheduled
        } else if self.result.is_empty() {
            MatchState::Started
        } else {
            MatchState::Completed
        }
    }
}

/// A user's predicted score for a match.
///
/// Identified by `(user_id, match_id)`; there is no separate key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub user_id: i64,
    pub match_id: i64,
    pub score: String,
}

/// A registered user. The password digest never leaves the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub login: String,
    pub name: String,
    pub is_admin: bool,
}

/// A user about to be inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub name: String,
    pub password_digest: String,
    pub is_admin: bool,
}

/// A tournament stage, e.g. a week of the regular season.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: i64,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Stage {
    /// Whether `now` falls inside the stage window (both ends inclusive).
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.end_date
    }
}

/// Partial update for a match. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPatch {
    pub teams: Option<[String; 2]>,
    pub date: Option<DateTime<Utc>>,
    pub result: Option<String>,
}

impl MatchPatch {
    /// Build a patch from loosely filled input.
    ///
    /// Teams are only taken when both names are non-empty, a result only
    /// when non-empty.
    pub fn from_fields(
        teams: Option<[String; 2]>,
        date: Option<DateTime<Utc>>,
        result: Option<String>,
    ) -> Self {
        Self {
            teams: teams.filter(|[a, b]| !a.is_empty() && !b.is_empty()),
            date,
            result: result.filter(|r| !r.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_none() && self.date.is_none() && self.result.is_none()
    }

    /// Apply the patch to an in-memory match.
    pub fn apply_to(&self, m: &mut Match) {
        if let Some(teams) = &self.teams {
            m.teams = teams.clone();
        }
        if let Some(date) = self.date {
            m.date = date;
        }
        if let Some(result) = &self.result {
            m.result = result.clone();
        }
    }
}

/// A team from the static league roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Team {
    pub id: u32,
    pub name: &'static str,
    pub code: &'static str,
}

/// The league roster.
pub const TEAMS: &[Team] = &[
    Team { id: 1, name: "London Spitfire", code: "LDN" },
    Team { id: 2, name: "Boston Uprising", code: "BOS" },
    Team { id: 3, name: "Seoul Dynasty", code: "SEO" },
    Team { id: 4, name: "Houston Outlaws", code: "HOU" },
    Team { id: 5, name: "New York Excelsior", code: "NYE" },
    Team { id: 6, name: "Los Angeles Gladiators", code: "GLA" },
    Team { id: 7, name: "Los Angeles Valiant", code: "LAV" },
    Team { id: 8, name: "Shanghai Dragons", code: "SHD" },
    Team { id: 9, name: "Dallas Fuel", code: "DAL" },
    Team { id: 10, name: "San Francisco Shock", code: "SFS" },
    Team { id: 11, name: "Florida Mayhem", code: "FLA" },
    Team { id: 12, name: "Philadelphia Fusion", code: "PHI" },
];

//! SQLite-backed store.
//!
//! SQLite allows a single writer, so the store owns exactly one connection
//! behind a mutex and every call runs on the blocking thread pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::timestamp::{format_timestamp, parse_timestamp};
use crate::{Match, MatchPatch, NewMatch, NewStage, NewUser, Prediction, Stage, Store, User};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS matches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        team_a TEXT NOT NULL,
        team_b TEXT NOT NULL,
        date TEXT NOT NULL,
        result TEXT NOT NULL DEFAULT ''
    );
    CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date);

    CREATE TABLE IF NOT EXISTS predictions (
        user_id INTEGER NOT NULL,
        match_id INTEGER NOT NULL,
        score TEXT NOT NULL,
        PRIMARY KEY (user_id, match_id)
    );
    CREATE INDEX IF NOT EXISTS idx_predictions_match ON predictions(match_id);

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        login TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        password TEXT NOT NULL,
        is_admin INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS stages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        start_date TEXT NOT NULL,
        end_date TEXT NOT NULL
    );
";

/// SQLite store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// A match row before its date column is parsed.
struct RawMatch {
    id: i64,
    team_a: String,
    team_b: String,
    date: String,
    result: String,
}

impl RawMatch {
    fn into_match(self) -> StoreResult<Match> {
        Ok(Match {
            id: self.id,
            teams: [self.team_a, self.team_b],
            date: parse_timestamp(&self.date)?,
            result: self.result,
            predictions: Vec::new(),
        })
    }
}

impl SqliteStore {
    /// Open or create the database file and bootstrap the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "database initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Task("connection mutex poisoned".to_string()))?;
            f(&*conn)
        })
        .await?
    }
}

/// Map unique-constraint failures to `Conflict`.
fn map_conflict(err: rusqlite::Error, what: String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(what)
        }
        _ => StoreError::Sqlite(err),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_matches(&self) -> StoreResult<Vec<Match>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, team_a, team_b, date, result FROM matches ORDER BY date ASC, id ASC",
            )?;
            let raw = stmt
                .query_map([], |row| {
                    Ok(RawMatch {
                        id: row.get(0)?,
                        team_a: row.get(1)?,
                        team_b: row.get(2)?,
                        date: row.get(3)?,
                        result: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            raw.into_iter().map(RawMatch::into_match).collect()
        })
        .await
    }

    async fn list_predictions_for_matches(&self, match_ids: &[i64]) -> StoreResult<Vec<Prediction>> {
        if match_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = match_ids.to_vec();
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql = format!(
                "SELECT user_id, match_id, score FROM predictions WHERE match_id IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), |row| {
                    Ok(Prediction {
                        user_id: row.get(0)?,
                        match_id: row.get(1)?,
                        score: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn insert_match(&self, new: &NewMatch) -> StoreResult<i64> {
        let new = new.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO matches (team_a, team_b, date, result) VALUES (?1, ?2, ?3, ?4)",
                params![new.teams[0], new.teams[1], format_timestamp(new.date), new.result],
            )?;
            let id = conn.last_insert_rowid();
            debug!(id, "match inserted");
            Ok(id)
        })
        .await
    }

    async fn update_match(&self, id: i64, patch: &MatchPatch) -> StoreResult<usize> {
        if patch.is_empty() {
            return Ok(0);
        }
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let mut columns: Vec<&str> = Vec::with_capacity(4);
            let mut values: Vec<Value> = Vec::with_capacity(5);

            if let Some([team_a, team_b]) = patch.teams {
                columns.push("team_a");
                values.push(Value::Text(team_a));
                columns.push("team_b");
                values.push(Value::Text(team_b));
            }
            if let Some(date) = patch.date {
                columns.push("date");
                values.push(Value::Text(format_timestamp(date)));
            }
            if let Some(result) = patch.result {
                columns.push("result");
                values.push(Value::Text(result));
            }

            let assignments = columns
                .iter()
                .enumerate()
                .map(|(i, column)| format!("{} = ?{}", column, i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE matches SET {} WHERE id = ?{}",
                assignments,
                columns.len() + 1
            );
            values.push(Value::Integer(id));

            let affected = conn.execute(&sql, params_from_iter(values))?;
            Ok(affected)
        })
        .await
    }

    async fn get_prediction(&self, user_id: i64, match_id: i64) -> StoreResult<Option<Prediction>> {
        self.with_conn(move |conn| {
            let prediction = conn
                .query_row(
                    "SELECT user_id, match_id, score FROM predictions
                     WHERE user_id = ?1 AND match_id = ?2",
                    params![user_id, match_id],
                    |row| {
                        Ok(Prediction {
                            user_id: row.get(0)?,
                            match_id: row.get(1)?,
                            score: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(prediction)
        })
        .await
    }

    async fn insert_prediction(&self, prediction: &Prediction) -> StoreResult<()> {
        let p = prediction.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO predictions (user_id, match_id, score) VALUES (?1, ?2, ?3)",
                params![p.user_id, p.match_id, p.score],
            )
            .map_err(|e| {
                map_conflict(
                    e,
                    format!("prediction exists for user {} match {}", p.user_id, p.match_id),
                )
            })?;
            Ok(())
        })
        .await
    }

    async fn update_prediction(&self, prediction: &Prediction) -> StoreResult<()> {
        let p = prediction.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE predictions SET score = ?3 WHERE user_id = ?1 AND match_id = ?2",
                params![p.user_id, p.match_id, p.score],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, login, name, is_admin FROM users ORDER BY id ASC")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(User {
                        id: row.get(0)?,
                        login: row.get(1)?,
                        name: row.get(2)?,
                        is_admin: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn find_user(&self, login: &str, password_digest: &str) -> StoreResult<Option<User>> {
        let login = login.to_lowercase();
        let digest = password_digest.to_string();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, login, name, is_admin FROM users WHERE login = ?1 AND password = ?2",
                    params![login, digest],
                    |row| {
                        Ok(User {
                            id: row.get(0)?,
                            login: row.get(1)?,
                            name: row.get(2)?,
                            is_admin: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn insert_user(&self, user: &NewUser) -> StoreResult<i64> {
        let user = user.clone();
        self.with_conn(move |conn| {
            let login = user.login.to_lowercase();
            conn.execute(
                "INSERT INTO users (login, name, password, is_admin) VALUES (?1, ?2, ?3, ?4)",
                params![login, user.name, user.password_digest, user.is_admin],
            )
            .map_err(|e| map_conflict(e, format!("login {} is taken", login)))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn list_stages(&self) -> StoreResult<Vec<Stage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, start_date, end_date FROM stages ORDER BY start_date ASC",
            )?;
            let raw = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            raw.into_iter()
                .map(|(id, name, start, end)| -> StoreResult<Stage> {
                    Ok(Stage {
                        id,
                        name,
                        start_date: parse_timestamp(&start)?,
                        end_date: parse_timestamp(&end)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn insert_stage(&self, stage: &NewStage) -> StoreResult<i64> {
        let stage = stage.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO stages (name, start_date, end_date) VALUES (?1, ?2, ?3)",
                params![
                    stage.name,
                    format_timestamp(stage.start_date),
                    format_timestamp(stage.end_date)
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

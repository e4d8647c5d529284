//! JSON API routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::{get, put},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use throne_cache::{
    Caches, Clock, CoreError, MatchAggregator, PasswordDigester, UserDirectory,
};
use throne_store::{Match, MatchPatch, Stage, Store, TEAMS, Team, User};

use crate::error::WebError;

/// Cookie holding the login name.
pub const LOGIN_COOKIE: &str = "Login";
/// Cookie holding the password digest.
pub const PASSWORD_COOKIE: &str = "Password";
/// Session cookies live for a week.
pub const SESSION_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

/// Shared state for the web server.
pub struct AppState {
    pub aggregator: MatchAggregator,
    pub users: UserDirectory,
}

impl AppState {
    /// Wire a fresh set of caches over `store`.
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, digester: PasswordDigester) -> Self {
        let caches = Caches::new();
        Self {
            aggregator: MatchAggregator::new(Arc::clone(&store), &caches, clock),
            users: UserDirectory::new(store, &caches, digester),
        }
    }
}

/// Body shape for writes and failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ApiStatus {
    pub fn ok() -> Self {
        Self {
            status: "OK",
            id: None,
            text: None,
        }
    }

    pub fn created(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::ok()
        }
    }

    pub fn fail(text: impl Into<String>) -> Self {
        Self {
            status: "Fail",
            id: None,
            text: Some(text.into()),
        }
    }
}

/// Create the web router.
///
/// Static files are served from `static_dir` for any path the API does not own.
pub fn create_router(state: AppState, static_dir: Option<&str>) -> Router {
    let state = Arc::new(state);

    let mut router = Router::new()
        .route("/api/matches", get(list_matches).post(create_match))
        .route("/api/matches/{id}", put(update_match))
        .route("/api/predictions", put(put_prediction))
        .route("/api/users", get(list_users))
        .route("/api/teams", get(list_teams))
        .route("/api/stages", get(list_stages))
        .route("/api/stages/current", get(current_stage))
        .route("/api/login", get(current_user).post(login))
        .route("/api/logout", get(logout))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache,must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ));

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(CorsLayer::permissive())
}

async fn session_user(state: &AppState, jar: &CookieJar) -> Result<User, WebError> {
    let (Some(login), Some(digest)) = (jar.get(LOGIN_COOKIE), jar.get(PASSWORD_COOKIE)) else {
        return Err(WebError::Unauthorized);
    };
    match state.users.find_by_digest(login.value(), digest.value()).await {
        Ok(user) => Ok(user),
        Err(CoreError::NotFound(_)) | Err(CoreError::Validation(_)) => Err(WebError::Unauthorized),
        Err(e) => Err(e.into()),
    }
}

async fn admin_user(state: &AppState, jar: &CookieJar) -> Result<User, WebError> {
    let user = session_user(state, jar).await?;
    if user.is_admin {
        Ok(user)
    } else {
        Err(WebError::Forbidden)
    }
}

fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::seconds(SESSION_MAX_AGE_SECS))
        .build()
}

async fn list_matches(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<Vec<Match>>, WebError> {
    let user = session_user(&state, &jar).await?;
    Ok(Json(state.aggregator.load_matches_view(user.id).await?))
}

#[derive(Deserialize)]
struct NewMatchBody {
    teams: [String; 2],
    date: DateTime<Utc>,
}

async fn create_match(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<NewMatchBody>,
) -> Result<impl IntoResponse, WebError> {
    admin_user(&state, &jar).await?;
    let m = state.aggregator.add_match(body.teams, body.date).await?;
    Ok((StatusCode::CREATED, Json(ApiStatus::created(m.id))))
}

async fn update_match(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    jar: CookieJar,
    Json(body): Json<MatchPatch>,
) -> Result<Json<ApiStatus>, WebError> {
    let user = admin_user(&state, &jar).await?;
    let patch = MatchPatch::from_fields(body.teams, body.date, body.result);
    state.aggregator.save_match(id, patch).await?;
    info!(id, by = %user.login, "match updated over http");
    Ok(Json(ApiStatus::ok()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictionBody {
    match_id: i64,
    score: String,
}

async fn put_prediction(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<PredictionBody>,
) -> Result<impl IntoResponse, WebError> {
    let user = session_user(&state, &jar).await?;
    match state
        .aggregator
        .submit_prediction(user.id, body.match_id, &body.score)
        .await
    {
        Ok(_) => Ok((StatusCode::CREATED, Json(ApiStatus::ok()))),
        Err(CoreError::NotFound(what)) => Err(WebError::BadRequest(format!("unknown {}", what))),
        Err(e) => Err(e.into()),
    }
}

async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<User>>, WebError> {
    Ok(Json(state.users.load_users().await?.to_vec()))
}

async fn list_teams() -> Json<&'static [Team]> {
    Json(TEAMS)
}

async fn list_stages(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Stage>>, WebError> {
    Ok(Json(state.aggregator.list_stages().await?.to_vec()))
}

async fn current_stage(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Option<Stage>>, WebError> {
    Ok(Json(state.aggregator.current_stage().await?))
}

#[derive(Deserialize)]
struct LoginBody {
    login: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<LoginBody>,
) -> Result<(CookieJar, Json<User>), WebError> {
    let user = match state.users.authenticate(&body.login, &body.password).await {
        Ok(user) => user,
        Err(CoreError::NotFound(_)) => return Err(WebError::Unauthorized),
        Err(e) => return Err(e.into()),
    };

    let digest = state.users.digester().digest(&body.password);
    let jar = jar
        .add(session_cookie(LOGIN_COOKIE, user.login.clone()))
        .add(session_cookie(PASSWORD_COOKIE, digest));

    info!(login = %user.login, "user logged in");
    Ok((jar, Json(user)))
}

async fn current_user(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<User>, WebError> {
    session_user(&state, &jar).await.map(Json)
}

async fn logout(jar: CookieJar) -> (CookieJar, Json<ApiStatus>) {
    let jar = jar
        .remove(Cookie::build(LOGIN_COOKIE).path("/"))
        .remove(Cookie::build(PASSWORD_COOKIE).path("/"));
    (jar, Json(ApiStatus::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_body_shape() {
        let ok = serde_json::to_value(ApiStatus::created(7)).unwrap();
        assert_eq!(ok, serde_json::json!({"status": "OK", "id": 7}));

        let fail = serde_json::to_value(ApiStatus::fail("nope")).unwrap();
        assert_eq!(fail, serde_json::json!({"status": "Fail", "text": "nope"}));
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie(LOGIN_COOKIE, "eiden".to_string());
        assert_eq!(cookie.name(), "Login");
        assert_eq!(cookie.value(), "eiden");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(
            cookie.max_age().map(|d| d.whole_seconds()),
            Some(SESSION_MAX_AGE_SECS)
        );
    }

    #[test]
    fn test_session_cookie_keeps_unusual_logins() {
        let cookie = session_cookie(LOGIN_COOKIE, "ana maria;x".to_string());
        assert_eq!(cookie.value(), "ana maria;x");
        assert_eq!(cookie.path(), Some("/"));
    }
}

//! Router tests against an in-memory store.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use throne_cache::{ManualClock, PasswordDigester};
use throne_store::MemoryStore;
use throne_web::{AppState, create_router};

const KEY: &str = "test-key";

struct App {
    router: Router,
    clock: Arc<ManualClock>,
    admin: String,
    alice: String,
    bob: String,
}

fn session(login: &str, password: &str) -> String {
    let digest = PasswordDigester::new(KEY).digest(password);
    format!("Login={}; Password={}", login, digest)
}

async fn app() -> App {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2018, 3, 12, 0, 0, 0).unwrap(),
    ));
    let state = AppState::new(store, clock.clone(), PasswordDigester::new(KEY));
    state.users.add_user("admin", "Admin", "root", true).await.unwrap();
    state.users.add_user("alice", "Alice", "a-pw", false).await.unwrap();
    state.users.add_user("bob", "Bob", "b-pw", false).await.unwrap();

    App {
        router: create_router(state, None),
        clock,
        admin: session("admin", "root"),
        alice: session("alice", "a-pw"),
        bob: session("bob", "b-pw"),
    }
}

fn request(method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &App, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn create_match(app: &App, date: &str) -> i64 {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/matches",
            Some(&app.admin),
            Some(json!({"teams": ["VAL", "NYE"], "date": date})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "OK");
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn login_sets_session_cookies() {
    let app = app().await;
    let response = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/api/login",
            None,
            Some(json!({"login": "Alice", "password": "a-pw"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    let digest = PasswordDigester::new(KEY).digest("a-pw");
    assert!(cookies.iter().any(|c| c.starts_with("Login=alice")));
    assert!(cookies.iter().any(|c| c.starts_with(&format!("Password={}", digest))));
    assert!(cookies.iter().all(|c| c.contains("Max-Age=604800")));

    let (status, body) = send(&app, request("GET", "/api/login", Some(&app.alice), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["login"], "alice");
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let app = app().await;
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/login",
            None,
            Some(json!({"login": "alice", "password": "wrong"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "Fail");

    let (status, _) = send(&app, request("GET", "/api/matches", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = session("alice", "guess");
    let (status, _) = send(&app, request("GET", "/api/matches", Some(&forged), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn only_admins_manage_matches() {
    let app = app().await;
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/matches",
            Some(&app.alice),
            Some(json!({"teams": ["VAL", "NYE"], "date": "2018-03-13T00:00:00Z"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/matches",
            Some(&app.admin),
            Some(json!({"teams": ["", "NYE"], "date": "2018-03-13T00:00:00Z"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "Fail");
}

#[tokio::test]
async fn predictions_are_masked_per_viewer_until_kickoff() {
    let app = app().await;
    let id = create_match(&app, "2018-03-12T01:00:00Z").await;

    for (cookie, score) in [(&app.alice, "3:1"), (&app.bob, "1:2")] {
        let (status, body) = send(
            &app,
            request(
                "PUT",
                "/api/predictions",
                Some(cookie),
                Some(json!({"matchId": id, "score": score})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"status": "OK"}));
    }

    let (status, body) = send(&app, request("GET", "/api/matches", Some(&app.alice), None)).await;
    assert_eq!(status, StatusCode::OK);
    let scores: Vec<&str> = body[0]["predictions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["score"].as_str().unwrap())
        .collect();
    assert_eq!(scores, vec!["3:1", "0:0"]);

    app.clock.advance(Duration::hours(2));
    let (_, body) = send(&app, request("GET", "/api/matches", Some(&app.alice), None)).await;
    let scores: Vec<&str> = body[0]["predictions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["score"].as_str().unwrap())
        .collect();
    assert_eq!(scores, vec!["3:1", "1:2"]);
}

#[tokio::test]
async fn closed_or_unknown_matches_reject_predictions() {
    let app = app().await;
    let id = create_match(&app, "2018-03-12T00:30:00Z").await;
    app.clock.advance(Duration::hours(1));

    let (status, body) = send(
        &app,
        request(
            "PUT",
            "/api/predictions",
            Some(&app.alice),
            Some(json!({"matchId": id, "score": "2:0"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "Fail");

    let (status, body) = send(
        &app,
        request(
            "PUT",
            "/api/predictions",
            Some(&app.alice),
            Some(json!({"matchId": 4242, "score": "2:0"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["text"], "unknown match 4242");
}

#[tokio::test]
async fn updating_results_and_unknown_matches() {
    let app = app().await;
    let id = create_match(&app, "2018-03-11T20:00:00Z").await;

    let (status, _) = send(
        &app,
        request(
            "PUT",
            &format!("/api/matches/{}", id),
            Some(&app.admin),
            Some(json!({"result": "3:0"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, request("GET", "/api/matches", Some(&app.bob), None)).await;
    assert_eq!(body[0]["result"], "3:0");

    let (status, _) = send(
        &app,
        request(
            "PUT",
            "/api/matches/9999",
            Some(&app.admin),
            Some(json!({"result": "3:0"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn responses_disable_caching() {
    let app = app().await;
    let response = app
        .router
        .clone()
        .oneshot(request("GET", "/api/teams", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache,must-revalidate"
    );
    assert_eq!(response.headers().get(header::PRAGMA).unwrap(), "no-cache");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let teams: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(teams.as_array().unwrap().len(), 12);
}

#[tokio::test]
async fn users_never_expose_digests() {
    let app = app().await;
    let (status, body) = send(&app, request("GET", "/api/users", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    let users = body.as_array().unwrap();
    assert_eq!(users.len(), 3);
    assert!(users.iter().all(|u| u.get("passwordDigest").is_none()));
}

#[tokio::test]
async fn current_stage_is_null_outside_stages() {
    let app = app().await;
    let (status, body) = send(&app, request("GET", "/api/stages/current", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
}

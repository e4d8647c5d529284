//! Round trips against a real SQLite file.

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use throne_store::{
    MatchPatch, NewMatch, NewStage, NewUser, Prediction, SqliteStore, Store, StoreError,
};

fn open_temp() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("throne.db")).unwrap();
    (dir, store)
}

fn new_match(a: &str, b: &str, hours_from_epoch: i64) -> NewMatch {
    NewMatch {
        teams: [a.to_string(), b.to_string()],
        date: Utc.with_ymd_and_hms(2018, 3, 12, 0, 0, 0).unwrap() + Duration::hours(hours_from_epoch),
        result: String::new(),
    }
}

#[tokio::test]
async fn matches_come_back_ordered_by_start() {
    let (_dir, store) = open_temp();

    let late = store.insert_match(&new_match("SEO", "NYE", 48)).await.unwrap();
    let early = store.insert_match(&new_match("LDN", "BOS", 2)).await.unwrap();

    let matches = store.list_matches().await.unwrap();
    let ids: Vec<i64> = matches.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![early, late]);
    assert_eq!(matches[0].teams, ["LDN".to_string(), "BOS".to_string()]);
    assert!(matches[0].predictions.is_empty());
}

#[tokio::test]
async fn partial_update_only_touches_supplied_fields() {
    let (_dir, store) = open_temp();
    let id = store.insert_match(&new_match("SEO", "NYE", 0)).await.unwrap();

    let patch = MatchPatch {
        result: Some("3:1".to_string()),
        ..MatchPatch::default()
    };
    assert_eq!(store.update_match(id, &patch).await.unwrap(), 1);

    let m = &store.list_matches().await.unwrap()[0];
    assert_eq!(m.result, "3:1");
    assert_eq!(m.teams, ["SEO".to_string(), "NYE".to_string()]);
}

#[tokio::test]
async fn update_of_unknown_match_affects_nothing() {
    let (_dir, store) = open_temp();
    let patch = MatchPatch {
        result: Some("1:0".to_string()),
        ..MatchPatch::default()
    };
    assert_eq!(store.update_match(9999, &patch).await.unwrap(), 0);
}

#[tokio::test]
async fn update_values_are_bound_not_interpolated() {
    let (_dir, store) = open_temp();
    let id = store.insert_match(&new_match("SEO", "NYE", 0)).await.unwrap();

    let hostile = "1:0'; DROP TABLE matches; --".to_string();
    let patch = MatchPatch {
        result: Some(hostile.clone()),
        ..MatchPatch::default()
    };
    store.update_match(id, &patch).await.unwrap();

    let matches = store.list_matches().await.unwrap();
    assert_eq!(matches[0].result, hostile);
}

#[tokio::test]
async fn predictions_filter_by_match_and_reject_duplicates() {
    let (_dir, store) = open_temp();
    let m1 = store.insert_match(&new_match("SEO", "NYE", 0)).await.unwrap();
    let m2 = store.insert_match(&new_match("LDN", "BOS", 1)).await.unwrap();

    let p = Prediction {
        user_id: 1,
        match_id: m1,
        score: "3:1".to_string(),
    };
    store.insert_prediction(&p).await.unwrap();
    store
        .insert_prediction(&Prediction {
            user_id: 1,
            match_id: m2,
            score: "0:4".to_string(),
        })
        .await
        .unwrap();

    let only_m1 = store.list_predictions_for_matches(&[m1]).await.unwrap();
    assert_eq!(only_m1, vec![p.clone()]);

    let err = store.insert_prediction(&p).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    store
        .update_prediction(&Prediction {
            score: "2:2".to_string(),
            ..p.clone()
        })
        .await
        .unwrap();
    let fetched = store.get_prediction(1, m1).await.unwrap().unwrap();
    assert_eq!(fetched.score, "2:2");
    assert!(store.get_prediction(2, m1).await.unwrap().is_none());
}

#[tokio::test]
async fn users_are_found_case_insensitively_by_digest() {
    let (_dir, store) = open_temp();
    let id = store
        .insert_user(&NewUser {
            login: "Eiden".to_string(),
            name: "AC".to_string(),
            password_digest: "abc123".to_string(),
            is_admin: true,
        })
        .await
        .unwrap();

    let user = store.find_user("EIDEN", "abc123").await.unwrap().unwrap();
    assert_eq!(user.id, id);
    assert_eq!(user.login, "eiden");
    assert!(user.is_admin);

    assert!(store.find_user("eiden", "wrong").await.unwrap().is_none());
    assert_eq!(store.list_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_persisted_dates_fail_the_whole_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("throne.db");
    let store = SqliteStore::open(&path).unwrap();
    store.insert_match(&new_match("SEO", "NYE", 0)).await.unwrap();

    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO matches (team_a, team_b, date, result) VALUES ('A', 'B', '12 Mar 2018, 02:00', '')",
            [],
        )
        .unwrap();
    }

    let err = store.list_matches().await.unwrap_err();
    assert!(matches!(err, StoreError::MalformedTimestamp { .. }));
}

#[tokio::test]
async fn stages_round_trip() {
    let store = SqliteStore::open_in_memory().unwrap();
    let start = Utc.with_ymd_and_hms(2018, 3, 1, 0, 0, 0).unwrap();
    store
        .insert_stage(&NewStage {
            name: "Stage 2".to_string(),
            start_date: start + Duration::days(7),
            end_date: start + Duration::days(14),
        })
        .await
        .unwrap();
    store
        .insert_stage(&NewStage {
            name: "Stage 1".to_string(),
            start_date: start,
            end_date: start + Duration::days(6),
        })
        .await
        .unwrap();

    let stages = store.list_stages().await.unwrap();
    let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Stage 1", "Stage 2"]);
    assert_eq!(stages[0].start_date, start);
}

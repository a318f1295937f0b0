#[path = "helpers.rs"]
mod helpers;

use std::io::Write;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use helpers::{call, get, post, put, store_with, test_app};
use memshard_core::{MomentumAdjustment, MutationMeta};
use memshard_host::HostConfig;
use serde_json::json;

#[tokio::test]
async fn health_reports_session_count() {
    let (app, store) = test_app();
    store.get_or_create("a");
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true, "sessions": 1}));
}

#[tokio::test]
async fn overlay_and_shard_reads() {
    let (app, _) = test_app();
    let (status, overlay) = get(&app, "/sessions/s1/memory").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overlay["sessionId"], json!("s1"));
    assert_eq!(overlay["changeCursor"], json!(0));
    assert_eq!(overlay["pendingOfflineReconcile"], json!(false));
    assert_eq!(overlay["shards"]["momentum"]["data"]["ceiling"], json!(3));

    let (status, shard) = get(&app, "/sessions/s1/memory/inventory").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shard["revision"], json!(1));
    assert_eq!(shard["data"], json!({"items": []}));

    let (status, err) = get(&app, "/sessions/s1/memory/spellbook").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], json!("unknown_shard"));
}

#[tokio::test]
async fn put_requires_an_expected_revision() {
    let (app, _) = test_app();
    let (status, err) = put(
        &app,
        "/sessions/s1/memory/character",
        json!({"data": {"name": "Ash"}}),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
    assert_eq!(err["code"], json!("expected_revision_required"));

    let (status, _) = put(&app, "/sessions/s1/memory/character", json!({"nope": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn put_accepts_revision_from_body_header_or_payload() {
    let (app, _) = test_app();
    let (status, body) = put(
        &app,
        "/sessions/s1/memory/character",
        json!({"data": {"name": "Ash"}, "expectedRevision": 1, "actor": "client"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], json!(2));
    assert_eq!(body["updatedBy"], json!("client"));
    assert_eq!(body["updatedAt"], json!(1_000));

    let (status, body) = call(
        &app,
        Method::PUT,
        "/sessions/s1/memory/character",
        &[("if-match", "\"2\"")],
        Some(json!({"data": {"name": "Bryn"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], json!(3));

    let (status, body) = put(
        &app,
        "/sessions/s1/memory/character",
        json!({"data": {"name": "Cato", "expectedRevision": 3}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], json!(4));

    let (_, shard) = get(&app, "/sessions/s1/memory/character").await;
    assert_eq!(shard["data"], json!({"name": "Cato"}));
    let (_, overlay) = get(&app, "/sessions/s1/memory").await;
    assert_eq!(overlay["characterName"], json!("Cato"));
}

#[tokio::test]
async fn stale_put_conflicts_with_revisions_in_body() {
    let (app, store) = test_app();
    let handle = store.get_or_create("s1");
    for _ in 0..2 {
        handle
            .adjust_momentum(&MomentumAdjustment::delta(1), &MutationMeta::default())
            .unwrap();
    }
    let (status, err) = put(
        &app,
        "/sessions/s1/memory/momentum",
        json!({"data": {"current": 0}, "expectedRevision": 2}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], json!("revision_mismatch"));
    assert_eq!(err["currentRevision"], json!(3));
    assert_eq!(err["expectedRevision"], json!(2));
    assert_eq!(handle.shard("momentum").unwrap().data["current"], json!(2));
}

#[tokio::test]
async fn canonical_put_is_forbidden() {
    let (app, _) = test_app();
    let (status, err) = put(
        &app,
        "/sessions/s1/memory/relationships",
        json!({"data": {"mira": "ally"}, "expectedRevision": 1, "scope": "canonical"}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], json!("canonical_write_not_allowed"));
}

#[tokio::test]
async fn canonical_put_is_forbidden_before_revision_checks() {
    let (app, store) = test_app();
    let (status, err) = put(
        &app,
        "/sessions/s1/memory/relationships",
        json!({"data": {"mira": "ally"}, "scope": "canonical"}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], json!("canonical_write_not_allowed"));
    let handle = store.get_or_create("s1");
    assert_eq!(handle.shard("relationships").unwrap().revision, 1);
}

#[tokio::test]
async fn payload_revision_field_is_kept_when_another_source_wins() {
    let (app, _) = test_app();
    let (status, body) = put(
        &app,
        "/sessions/s1/memory/character",
        json!({"data": {"name": "Ash", "expectedRevision": 7}, "expectedRevision": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], json!(2));

    let (status, _) = call(
        &app,
        Method::PUT,
        "/sessions/s1/memory/character",
        &[("if-match", "2")],
        Some(json!({"data": {"name": "Bryn", "expectedRevision": 9}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, shard) = get(&app, "/sessions/s1/memory/character").await;
    assert_eq!(shard["data"], json!({"name": "Bryn", "expectedRevision": 9}));
}

#[tokio::test]
async fn capability_errors_are_bad_requests() {
    let (app, _) = test_app();
    let (status, err) = put(
        &app,
        "/sessions/s1/memory/relationships",
        json!({
            "data": {"mira": "ally"},
            "expectedRevision": 1,
            "capabilityRefs": [{"capabilityId": "peril", "severity": "critical"}],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], json!("capability_severity_mismatch"));

    let (status, _) = put(
        &app,
        "/sessions/s1/memory/relationships",
        json!({
            "data": {"mira": "ally"},
            "expectedRevision": 1,
            "capabilityRefs": [{"capabilityId": "peril"}],
            "safetyFlags": ["Mild Peril"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, overlay) = get(&app, "/sessions/s1/memory").await;
    assert_eq!(
        overlay["capabilityReferences"],
        json!([{"capabilityId": "peril", "severity": "medium"}])
    );
    let (_, window) = get(&app, "/sessions/s1/memory/changes").await;
    assert_eq!(window["entries"][0]["safetyFlags"], json!(["mild-peril"]));
}

#[tokio::test]
async fn changes_page_and_ack_round() {
    let (app, store) = test_app();
    let handle = store.get_or_create("s1");
    for delta in [1, 1, -1] {
        handle
            .adjust_momentum(&MomentumAdjustment::delta(delta), &MutationMeta::default())
            .unwrap();
    }

    let (status, window) = get(&app, "/sessions/s1/memory/changes?since=0&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(window["entries"].as_array().map(Vec::len), Some(2));
    assert_eq!(window["nextCursor"], json!(2));
    assert_eq!(window["hasMore"], json!(true));
    assert_eq!(window["latestCursor"], json!(3));
    assert_eq!(window["entries"][0]["action"], json!("momentum-adjustment"));

    let (status, _) = get(&app, "/sessions/s1/memory/changes?since=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, ack) = post(&app, "/sessions/s1/memory/ack", json!({"cursor": 3})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({"acknowledgedThrough": 3, "pending": false}));
    let (_, ack) = post(&app, "/sessions/s1/memory/ack", json!({"cursor": 1})).await;
    assert_eq!(ack["acknowledgedThrough"], json!(3));

    let (status, _) = post(&app, "/sessions/s1/memory/ack", json!({"cursor": "x"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn catalog_file_drives_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[{{"capabilityId": "gore", "severity": "high"}}]"#
    )
    .unwrap();
    let cfg = HostConfig {
        capability_catalog: Some(file.path().to_path_buf()),
        ..HostConfig::default()
    };
    let store = store_with(cfg.validator().unwrap());
    let app = memshard_host::app(Arc::clone(&store));

    let (status, err) = put(
        &app,
        "/sessions/s1/memory/character",
        json!({
            "data": {"name": "Ash"},
            "expectedRevision": 1,
            "capabilityRefs": [{"capabilityId": "peril"}],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], json!("unknown_capability_reference"));

    let (status, _) = put(
        &app,
        "/sessions/s1/memory/character",
        json!({
            "data": {"name": "Ash"},
            "expectedRevision": 1,
            "capabilityRefs": [{"capabilityId": "gore"}],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use revlink::db::{InstallStatus, InstallationUpsert, ReviewStatus};
use revlink::tracker::WebhookEvent;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

const SECRET: &str = "hook-secret";

fn unique_sqlite_path(prefix: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();

    let mut temp_path = std::env::temp_dir();
    temp_path.push(format!(
        "revlink-{prefix}-{}-{}.sqlite",
        std::process::id(),
        nanos
    ));
    temp_path
}

/// App with a linked account holding an active installation for repo 42,
/// so the review overview has something to join against.
async fn build_installed_app(prefix: &str) -> (axum::Router, revlink::AppState, String) {
    let temp_path = unique_sqlite_path(prefix);
    let database_url = format!("sqlite:{}", temp_path.display());
    let db = revlink::db::spawn(&database_url).await;

    let mut cfg = revlink::config::Config::default();
    cfg.basic.webhook_secret = SECRET.to_string();

    let state = revlink::AppState::new(db, Arc::new(cfg));
    let app = revlink::app_router(state.clone());

    let account = state
        .credentials
        .put(revlink::db::AccountUpsert {
            base_url: "https://gitlab.example".to_string(),
            username: "dev".to_string(),
            name: None,
            avatar_url: None,
            token: "glpat-abc".to_string(),
        })
        .await
        .expect("account upsert");
    state
        .db
        .upsert_installation(InstallationUpsert {
            repository_id: 42,
            account_id: account.id,
            webhook_id: Some(99),
            callback_url: "https://revlink.example/webhook/gitlab".to_string(),
            status: InstallStatus::Active,
            error: None,
        })
        .await
        .expect("installation upsert");
    let session = state.sessions.mint(account.id);
    (app, state, session.token)
}

fn webhook_request(secret: Option<&str>, payload: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/gitlab")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-gitlab-token", secret);
    }
    builder
        .body(Body::from(payload.to_string()))
        .expect("failed to build request")
}

fn mr_payload(action: &str, title: &str, revision: &str) -> serde_json::Value {
    serde_json::json!({
        "object_kind": "merge_request",
        "project": { "id": 42 },
        "object_attributes": {
            "iid": 7,
            "title": title,
            "source_branch": "feat/thing",
            "url": "https://gitlab.example/demo/-/merge_requests/7",
            "last_commit": { "id": revision },
            "action": action
        }
    })
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body was not JSON")
}

async fn overview(app: &axum::Router, session: &str) -> serde_json::Value {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/reviews")
                .header(header::AUTHORIZATION, format!("Bearer {session}"))
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await
}

#[tokio::test]
async fn deliveries_without_the_secret_are_rejected_and_not_applied() {
    let (app, _state, session) = build_installed_app("hook-nosecret").await;

    let resp = app
        .clone()
        .oneshot(webhook_request(None, &mr_payload("open", "Fix bug", "c1")))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "unauthorized");

    let resp = app
        .clone()
        .oneshot(webhook_request(
            Some("not-the-secret"),
            &mr_payload("open", "Fix bug", "c1"),
        ))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Nothing reached the store.
    assert_eq!(overview(&app, &session).await.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn merge_request_open_then_completion_reaches_reviewed() {
    let (app, state, session) = build_installed_app("hook-lifecycle").await;

    let resp = app
        .clone()
        .oneshot(webhook_request(
            Some(SECRET),
            &mr_payload("open", "Fix bug", "c1"),
        ))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "ok");

    let records = overview(&app, &session).await;
    assert_eq!(records[0]["mr_iid"], 7);
    assert_eq!(records[0]["status"], "Pending");
    assert_eq!(records[0]["title"], "Fix bug");

    // The review computation reports back through the tracker.
    state
        .tracker
        .on_webhook_event(WebhookEvent::ReviewCompleted {
            repository_id: 42,
            mr_iid: 7,
            outcome: ReviewStatus::Reviewed,
            summary: Some("looks good".to_string()),
            url: None,
        })
        .await
        .expect("completion applied");

    let records = overview(&app, &session).await;
    assert_eq!(records.as_array().map(Vec::len), Some(1));
    assert_eq!(records[0]["status"], "Reviewed");
    assert_eq!(records[0]["summary"], "looks good");
}

#[tokio::test]
async fn a_terminal_record_restarts_only_on_a_new_revision() {
    let (app, state, session) = build_installed_app("hook-terminal").await;

    app.clone()
        .oneshot(webhook_request(
            Some(SECRET),
            &mr_payload("open", "Fix bug", "c1"),
        ))
        .await
        .expect("request failed");
    state
        .tracker
        .on_webhook_event(WebhookEvent::ReviewCompleted {
            repository_id: 42,
            mr_iid: 7,
            outcome: ReviewStatus::Reviewed,
            summary: Some("looks good".to_string()),
            url: None,
        })
        .await
        .expect("completion applied");

    // A stray duplicate completion does not disturb the terminal state.
    state
        .tracker
        .on_webhook_event(WebhookEvent::ReviewCompleted {
            repository_id: 42,
            mr_iid: 7,
            outcome: ReviewStatus::Reviewed,
            summary: None,
            url: None,
        })
        .await
        .expect("duplicate completion applied");
    let records = overview(&app, &session).await;
    assert_eq!(records[0]["status"], "Reviewed");
    assert_eq!(records[0]["summary"], "looks good");

    // A pipeline event is not a revision signal either.
    let resp = app
        .clone()
        .oneshot(webhook_request(
            Some(SECRET),
            &serde_json::json!({
                "object_kind": "pipeline",
                "project": { "id": 42 },
                "object_attributes": { "status": "success" }
            }),
        ))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let records = overview(&app, &session).await;
    assert_eq!(records[0]["status"], "Reviewed");

    // An updated revision is, and it restarts the lifecycle.
    app.clone()
        .oneshot(webhook_request(
            Some(SECRET),
            &mr_payload("update", "Fix bug (v2)", "c2"),
        ))
        .await
        .expect("request failed");
    let records = overview(&app, &session).await;
    assert_eq!(records.as_array().map(Vec::len), Some(1));
    assert_eq!(records[0]["status"], "Pending");
    assert_eq!(records[0]["title"], "Fix bug (v2)");
}

#[tokio::test]
async fn a_redelivered_open_event_does_not_regress_a_terminal_record() {
    let (app, state, session) = build_installed_app("hook-redelivery").await;

    app.clone()
        .oneshot(webhook_request(
            Some(SECRET),
            &mr_payload("open", "Fix bug", "c1"),
        ))
        .await
        .expect("request failed");
    state
        .tracker
        .on_webhook_event(WebhookEvent::ReviewCompleted {
            repository_id: 42,
            mr_iid: 7,
            outcome: ReviewStatus::Reviewed,
            summary: Some("looks good".to_string()),
            url: None,
        })
        .await
        .expect("completion applied");

    // The provider times out on our ack and re-sends the identical open
    // event. Same revision marker: the terminal state must hold.
    let resp = app
        .clone()
        .oneshot(webhook_request(
            Some(SECRET),
            &mr_payload("open", "Fix bug", "c1"),
        ))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let records = overview(&app, &session).await;
    assert_eq!(records.as_array().map(Vec::len), Some(1));
    assert_eq!(records[0]["status"], "Reviewed");
    assert_eq!(records[0]["summary"], "looks good");

    // A reopen carrying a new revision is not a duplicate.
    app.clone()
        .oneshot(webhook_request(
            Some(SECRET),
            &mr_payload("reopen", "Fix bug", "c2"),
        ))
        .await
        .expect("request failed");
    let records = overview(&app, &session).await;
    assert_eq!(records[0]["status"], "Pending");
}

#[tokio::test]
async fn completion_arriving_before_the_open_event_is_tolerated() {
    let (app, state, session) = build_installed_app("hook-ooo").await;

    state
        .tracker
        .on_webhook_event(WebhookEvent::ReviewCompleted {
            repository_id: 42,
            mr_iid: 7,
            outcome: ReviewStatus::Reviewed,
            summary: Some("looks good".to_string()),
            url: None,
        })
        .await
        .expect("completion applied");

    let records = overview(&app, &session).await;
    assert_eq!(records[0]["status"], "Reviewed");
    assert!(records[0]["title"].is_null());

    // The late open event fills in the metadata and restarts the review
    // for the revision it announces.
    app.clone()
        .oneshot(webhook_request(
            Some(SECRET),
            &mr_payload("open", "Fix bug", "c1"),
        ))
        .await
        .expect("request failed");
    let records = overview(&app, &session).await;
    assert_eq!(records.as_array().map(Vec::len), Some(1));
    assert_eq!(records[0]["status"], "Pending");
    assert_eq!(records[0]["title"], "Fix bug");
}

#[tokio::test]
async fn record_timestamps_are_strictly_monotonic() {
    let (_app, state, _session) = build_installed_app("hook-monotonic").await;

    let mut last = None;
    for i in 0..5 {
        let record = state
            .tracker
            .on_webhook_event(WebhookEvent::MergeRequestUpdated {
                repository_id: 42,
                mr_iid: 7,
                title: Some(format!("rev {i}")),
                branch: None,
                url: None,
                revision: Some(format!("c{i}")),
            })
            .await
            .expect("revision applied")
            .expect("record returned");
        if let Some(prev) = last {
            assert!(record.updated_at > prev, "updated_at must strictly increase");
        }
        last = Some(record.updated_at);
    }
}

#[tokio::test]
async fn undecipherable_payloads_are_acked_and_dropped() {
    let (app, _state, session) = build_installed_app("hook-garbage").await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/gitlab")
                .header("x-gitlab-token", SECRET)
                .body(Body::from("this is not json"))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "ignored");

    // Unknown object kinds are acked too; re-delivery would not help.
    let resp = app
        .clone()
        .oneshot(webhook_request(
            Some(SECRET),
            &serde_json::json!({ "object_kind": "wiki_page" }),
        ))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(overview(&app, &session).await.as_array().map(Vec::len), Some(0));
}

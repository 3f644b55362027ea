use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

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

async fn build_app(prefix: &str) -> (axum::Router, revlink::AppState) {
    let temp_path = unique_sqlite_path(prefix);
    let database_url = format!("sqlite:{}", temp_path.display());
    let db = revlink::db::spawn(&database_url).await;

    let mut cfg = revlink::config::Config::default();
    cfg.basic.webhook_secret = "hook-secret".to_string();

    let state = revlink::AppState::new(db, Arc::new(cfg));
    let app = revlink::app_router(state.clone());
    (app, state)
}

fn identity_json() -> serde_json::Value {
    serde_json::json!({
        "id": 1,
        "username": "dev",
        "name": "Dev Eloper",
        "avatar_url": "https://gitlab.example/avatar.png"
    })
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body was not JSON")
}

#[tokio::test]
async fn validate_token_round_trips_the_provider_identity() {
    let gitlab = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(identity_json()))
        .expect(1)
        .mount(&gitlab)
        .await;

    let (app, _state) = build_app("validate-ok").await;
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/validate-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "token": "glpat-abc", "base_url": gitlab.uri() })
                        .to_string(),
                ))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["username"], "dev");
    assert_eq!(body["name"], "Dev Eloper");
}

#[tokio::test]
async fn validate_token_rejection_creates_no_account_or_session() {
    let gitlab = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/user"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&gitlab)
        .await;

    let (app, state) = build_app("validate-bad").await;
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/validate-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "token": "revoked", "base_url": gitlab.uri() }).to_string(),
                ))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    // Side-effect free: no account row was committed.
    assert!(state.db.get_account(1).await.expect("db reachable").is_none());
}

#[tokio::test]
async fn save_settings_links_the_account_and_mints_a_usable_session() {
    let gitlab = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(identity_json()))
        .mount(&gitlab)
        .await;

    let (app, _state) = build_app("save-settings").await;
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save-settings")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "token": "glpat-abc", "base_url": gitlab.uri() })
                        .to_string(),
                ))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let session = body["session"].as_str().expect("session token").to_string();
    assert!(!session.is_empty());
    assert_eq!(body["username"], "dev");

    // The session works for the settings read, and the token is redacted.
    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/settings")
                .header(header::AUTHORIZATION, format!("Bearer {session}"))
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["username"], "dev");
    assert_eq!(body["provider"], "gitlab");
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn settings_without_a_session_is_unauthenticated() {
    let (app, _state) = build_app("settings-unauth").await;
    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/settings")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn logout_revokes_the_session_and_is_idempotent() {
    let (app, state) = build_app("logout").await;
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
    let session = state.sessions.mint(account.id);

    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .header(header::AUTHORIZATION, format!("Bearer {}", session.token))
                    .body(Body::empty())
                    .expect("failed to build request"),
            )
            .await
            .expect("request failed");
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/settings")
                .header(header::AUTHORIZATION, format!("Bearer {}", session.token))
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repos_lists_the_accounts_projects() {
    let gitlab = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": 42,
                "name_with_namespace": "group / demo",
                "path_with_namespace": "group/demo",
                "visibility": "private",
                "web_url": "https://gitlab.example/group/demo",
                "avatar_url": null
            }
        ])))
        .expect(1)
        .mount(&gitlab)
        .await;

    let (app, state) = build_app("repos").await;
    let account = state
        .credentials
        .put(revlink::db::AccountUpsert {
            base_url: gitlab.uri(),
            username: "dev".to_string(),
            name: None,
            avatar_url: None,
            token: "glpat-abc".to_string(),
        })
        .await
        .expect("account upsert");
    let session = state.sessions.mint(account.id);

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/repos")
                .header(header::AUTHORIZATION, format!("Bearer {}", session.token))
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body[0]["id"], 42);
    assert_eq!(body[0]["name"], "group / demo");
    assert_eq!(body[0]["visibility"], "private");
}

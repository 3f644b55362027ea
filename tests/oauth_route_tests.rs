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

async fn build_app(prefix: &str, cfg: revlink::config::Config) -> axum::Router {
    let temp_path = unique_sqlite_path(prefix);
    let database_url = format!("sqlite:{}", temp_path.display());
    let db = revlink::db::spawn(&database_url).await;
    let state = revlink::AppState::new(db, Arc::new(cfg));
    revlink::app_router(state)
}

fn oauth_config(gitlab_uri: &str) -> revlink::config::Config {
    let mut cfg = revlink::config::Config::default();
    cfg.basic.webhook_secret = "hook-secret".to_string();
    cfg.gitlab.base_url = url::Url::parse(gitlab_uri).expect("mock server url");
    cfg.gitlab.oauth_client_id = "test-client-id".to_string();
    cfg.gitlab.oauth_client_secret = "test-client-secret".to_string();
    cfg
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body was not JSON")
}

#[tokio::test]
async fn oauth_entry_redirects_with_flow_cookies() {
    let gitlab = MockServer::start().await;
    let app = build_app("oauth-entry", oauth_config(&gitlab.uri())).await;

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/gitlab")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = resp
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("redirect location");
    assert!(location.starts_with(&format!("{}/oauth/authorize", gitlab.uri())));
    assert!(location.contains("client_id=test-client-id"));
    assert!(location.contains("code_challenge="));
    assert!(location.contains("state="));

    let cookies: Vec<&str> = resp
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    assert!(
        cookies
            .iter()
            .any(|c| c.starts_with("gitlab_oauth_csrf_token="))
    );
    assert!(
        cookies
            .iter()
            .any(|c| c.starts_with("gitlab_oauth_pkce_verifier="))
    );
}

#[tokio::test]
async fn oauth_entry_without_client_id_is_a_flow_error() {
    let gitlab = MockServer::start().await;
    let mut cfg = oauth_config(&gitlab.uri());
    cfg.gitlab.oauth_client_id = String::new();
    let app = build_app("oauth-disabled", cfg).await;

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/gitlab")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "OAUTH_NOT_CONFIGURED");
}

#[tokio::test]
async fn oauth_callback_without_flow_cookies_is_rejected() {
    let gitlab = MockServer::start().await;
    // The token endpoint must never be hit when the flow cookies are gone.
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&gitlab)
        .await;

    let app = build_app("oauth-nocookies", oauth_config(&gitlab.uri())).await;
    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/gitlab/callback?code=abc&state=xyz")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "OAUTH_SESSION_MISSING");
}

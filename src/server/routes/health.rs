use crate::server::router::AppState;
use axum::{Json, extract::State};
use serde_json::{Value, json};

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health/config
///
/// Non-secret configuration summary for deployment sanity checks.
pub async fn config_summary(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "gitlab_base_url": state.config.gitlab.base_url.as_str(),
        "has_webhook_secret": !state.webhook_secret.is_empty(),
        "oauth_enabled": state.config.gitlab.oauth_enabled(),
        "agent_enabled": state.dispatcher.is_some(),
        "default_callback_url": state.default_callback_url(),
    }))
}

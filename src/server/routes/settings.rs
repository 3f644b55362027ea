use crate::db::AccountUpsert;
use crate::error::RevlinkError;
use crate::server::guards::auth::SessionIdentity;
use crate::server::router::AppState;
use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SettingsBody {
    pub token: String,
    pub base_url: String,
}

/// POST /validate-token
///
/// Live "who am I" check so the user gets immediate feedback before a
/// credential is committed. No account or session is created.
pub async fn validate_token(
    State(state): State<AppState>,
    Json(body): Json<SettingsBody>,
) -> Result<Json<Value>, RevlinkError> {
    let base_url = body.base_url.trim_end_matches('/');
    let identity = state.credentials.validate_token(&body.token, base_url).await?;
    Ok(Json(json!({
        "ok": true,
        "username": identity.username,
        "name": identity.name,
        "avatar_url": identity.avatar_url,
    })))
}

/// POST /save-settings
///
/// Connects an account with a personal access token: validates it live,
/// stores (or refreshes) the credential, and mints a session.
pub async fn save_settings(
    State(state): State<AppState>,
    Json(body): Json<SettingsBody>,
) -> Result<Json<Value>, RevlinkError> {
    let base_url = body.base_url.trim_end_matches('/').to_string();
    let identity = state
        .credentials
        .validate_token(&body.token, &base_url)
        .await?;

    let account = state
        .credentials
        .put(AccountUpsert {
            base_url,
            username: identity.username,
            name: identity.name,
            avatar_url: identity.avatar_url,
            token: body.token,
        })
        .await?;

    let session = state.sessions.mint(account.id);
    info!(account_id = account.id, username = %account.username, "account linked via token");
    Ok(Json(json!({
        "session": session.token,
        "account_id": account.id,
        "username": account.username,
        "expires_at": session.expires_at,
    })))
}

/// GET /settings
///
/// Current account settings. The token never crosses this boundary.
pub async fn get_settings(
    State(state): State<AppState>,
    session: SessionIdentity,
) -> Result<Json<Value>, RevlinkError> {
    let account = state.credentials.account(session.account_id).await?;
    Ok(Json(json!({
        "provider": account.provider,
        "base_url": account.base_url,
        "username": account.username,
        "name": account.name,
        "avatar_url": account.avatar_url,
    })))
}

use crate::db::DbInstallation;
use crate::error::RevlinkError;
use crate::server::guards::auth::SessionIdentity;
use crate::server::router::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct InstallBody {
    pub callback_url: Option<String>,
}

/// POST /repos/{repository_id}/webhook
///
/// Installs the review webhook. Idempotent: repeating the call returns the
/// existing installation with the same webhook id.
pub async fn install_webhook(
    State(state): State<AppState>,
    session: SessionIdentity,
    Path(repository_id): Path<i64>,
    body: Option<Json<InstallBody>>,
) -> Result<Json<DbInstallation>, RevlinkError> {
    let callback_url = body
        .and_then(|Json(b)| b.callback_url)
        .or_else(|| state.default_callback_url())
        .ok_or_else(|| RevlinkError::InstallError {
            reason: "no callback_url in the request and basic.public_base_url is not configured"
                .to_string(),
        })?;

    let installation = state
        .installer
        .install(session.account_id, repository_id, &callback_url)
        .await?;
    Ok(Json(installation))
}

/// DELETE /repos/{repository_id}/webhook
///
/// Removes the webhook and forgets the installation. Idempotent.
pub async fn uninstall_webhook(
    State(state): State<AppState>,
    session: SessionIdentity,
    Path(repository_id): Path<i64>,
) -> Result<StatusCode, RevlinkError> {
    state
        .installer
        .uninstall(session.account_id, repository_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

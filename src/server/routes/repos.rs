use crate::catalog::Repository;
use crate::error::RevlinkError;
use crate::server::guards::auth::SessionIdentity;
use crate::server::router::AppState;
use axum::{Json, extract::State};

/// GET /repos
///
/// Lists the repositories visible to the linked account. Fetched fresh from
/// the provider on every call.
pub async fn list_repos(
    State(state): State<AppState>,
    session: SessionIdentity,
) -> Result<Json<Vec<Repository>>, RevlinkError> {
    let repos = state.catalog.list(session.account_id).await?;
    Ok(Json(repos))
}

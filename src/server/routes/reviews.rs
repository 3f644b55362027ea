use crate::db::DbReviewRecord;
use crate::error::RevlinkError;
use crate::server::guards::auth::SessionIdentity;
use crate::server::router::AppState;
use axum::{Json, extract::State};

/// GET /reviews
///
/// Aggregated review lifecycle for the account's installed repositories,
/// newest activity first. Served from local state; never blocks on the
/// provider.
pub async fn overview(
    State(state): State<AppState>,
    session: SessionIdentity,
) -> Result<Json<Vec<DbReviewRecord>>, RevlinkError> {
    let records = state.tracker.overview(session.account_id).await?;
    Ok(Json(records))
}

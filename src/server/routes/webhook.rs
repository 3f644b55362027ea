use crate::agent::ReviewContext;
use crate::db::ReviewStatus;
use crate::error::RevlinkError;
use crate::server::guards::auth::RequireWebhookSecret;
use crate::server::router::AppState;
use crate::tracker::WebhookEvent;
use axum::{Json, body::Bytes, extract::State};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// POST /webhook/gitlab
///
/// Inbound provider deliveries. The secret guard runs before the body is
/// touched. Deliveries are at-least-once and unordered; a payload we cannot
/// parse is acked and dropped (the provider re-sending it would not help),
/// while a store failure propagates as 5xx so the provider retries.
pub async fn gitlab_webhook(
    State(state): State<AppState>,
    _guard: RequireWebhookSecret,
    body: Bytes,
) -> Result<Json<Value>, RevlinkError> {
    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        warn!("webhook payload was not valid JSON; ignoring");
        return Ok(Json(json!({ "status": "ignored" })));
    };

    let event = WebhookEvent::parse(&payload);
    let review_ctx = revision_context(&event);

    let record = state.tracker.on_webhook_event(event).await?;

    // A merge-request revision leaves the record Pending; that is the
    // trigger for the review computation, if one is configured.
    if let (Some(record), Some(ctx)) = (&record, review_ctx) {
        if record.status == ReviewStatus::Pending {
            match &state.dispatcher {
                Some(dispatcher) => {
                    dispatcher.spawn(ctx);
                }
                None => debug!(
                    repository_id = record.repository_id,
                    mr_iid = record.mr_iid,
                    "no review agent configured; record stays pending"
                ),
            }
        }
    }

    Ok(Json(json!({ "status": "ok" })))
}

fn revision_context(event: &WebhookEvent) -> Option<ReviewContext> {
    match event {
        WebhookEvent::MergeRequestOpened {
            repository_id,
            mr_iid,
            title,
            branch,
            ..
        }
        | WebhookEvent::MergeRequestUpdated {
            repository_id,
            mr_iid,
            title,
            branch,
            ..
        } => Some(ReviewContext {
            repository_id: *repository_id,
            mr_iid: *mr_iid,
            title: title.clone(),
            branch: branch.clone(),
        }),
        _ => None,
    }
}

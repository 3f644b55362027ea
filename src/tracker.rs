//! Review lifecycle tracking.
//!
//! Webhook delivery is at-least-once with no ordering guarantee, so every
//! event is folded into the record with upsert-by-key semantics: first
//! sight creates, later sights fill missing fields, and a terminal status
//! only regresses to `Pending` on a genuine revision signal.

use crate::db::{DbHandle, DbReviewRecord, ReviewApply, ReviewStatus};
use crate::error::RevlinkError;
use serde_json::Value;
use tracing::debug;

/// One inbound fact about a merge request, either pushed by the provider or
/// emitted by the review computation.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    MergeRequestOpened {
        repository_id: i64,
        mr_iid: i64,
        title: Option<String>,
        branch: Option<String>,
        url: Option<String>,
        revision: Option<String>,
    },
    MergeRequestUpdated {
        repository_id: i64,
        mr_iid: i64,
        title: Option<String>,
        branch: Option<String>,
        url: Option<String>,
        revision: Option<String>,
    },
    /// Provider pipeline completion. Logged, no review-state change.
    PipelineCompleted {
        repository_id: i64,
        status: String,
    },
    /// Outcome of the (external) review computation.
    ReviewCompleted {
        repository_id: i64,
        mr_iid: i64,
        outcome: ReviewStatus,
        summary: Option<String>,
        url: Option<String>,
    },
    /// Anything we do not understand. Ignored, never fatal.
    Unknown {
        kind: String,
    },
}

impl WebhookEvent {
    /// Defensive parse of a provider payload. Unknown kinds, unhandled
    /// merge-request actions, and payloads missing their identifying keys
    /// all collapse to `Unknown`.
    pub fn parse(payload: &Value) -> Self {
        let kind = payload
            .get("object_kind")
            .and_then(Value::as_str)
            .unwrap_or("");
        match kind {
            "merge_request" => Self::parse_merge_request(payload),
            "pipeline" => Self::parse_pipeline(payload),
            other => Self::Unknown {
                kind: other.to_string(),
            },
        }
    }

    fn parse_merge_request(payload: &Value) -> Self {
        let attrs = payload.get("object_attributes");
        let repository_id = payload
            .get("project")
            .and_then(|p| p.get("id"))
            .and_then(Value::as_i64);
        let mr_iid = attrs.and_then(|a| a.get("iid")).and_then(Value::as_i64);
        let (Some(repository_id), Some(mr_iid)) = (repository_id, mr_iid) else {
            return Self::Unknown {
                kind: "merge_request/malformed".to_string(),
            };
        };

        let field = |name: &str| {
            attrs
                .and_then(|a| a.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let title = field("title");
        let branch = field("source_branch");
        let url = field("url");
        // The last commit sha identifies the revision; older instances omit
        // it, in which case the attribute timestamp stands in.
        let revision = attrs
            .and_then(|a| a.get("last_commit"))
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| field("updated_at"));

        match field("action").as_deref() {
            Some("open" | "reopen") | None => Self::MergeRequestOpened {
                repository_id,
                mr_iid,
                title,
                branch,
                url,
                revision,
            },
            Some("update") => Self::MergeRequestUpdated {
                repository_id,
                mr_iid,
                title,
                branch,
                url,
                revision,
            },
            Some(action) => Self::Unknown {
                kind: format!("merge_request/{action}"),
            },
        }
    }

    fn parse_pipeline(payload: &Value) -> Self {
        let repository_id = payload
            .get("project")
            .and_then(|p| p.get("id"))
            .and_then(Value::as_i64);
        let status = payload
            .get("object_attributes")
            .and_then(|a| a.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        match repository_id {
            Some(repository_id) => Self::PipelineCompleted {
                repository_id,
                status: status.to_string(),
            },
            None => Self::Unknown {
                kind: "pipeline/malformed".to_string(),
            },
        }
    }
}

/// Applies webhook events and serves the aggregated view.
#[derive(Clone)]
pub struct ReviewTracker {
    db: DbHandle,
}

impl ReviewTracker {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Folds one event into the store. Returns the touched record, or
    /// `None` when the event carried no review-state change.
    pub async fn on_webhook_event(
        &self,
        event: WebhookEvent,
    ) -> Result<Option<DbReviewRecord>, RevlinkError> {
        match event {
            WebhookEvent::MergeRequestOpened {
                repository_id,
                mr_iid,
                title,
                branch,
                url,
                revision,
            }
            | WebhookEvent::MergeRequestUpdated {
                repository_id,
                mr_iid,
                title,
                branch,
                url,
                revision,
            } => {
                let record = self
                    .db
                    .apply_review(ReviewApply::Revision {
                        repository_id,
                        mr_iid,
                        title,
                        branch,
                        url,
                        revision,
                    })
                    .await?;
                Ok(Some(record))
            }
            WebhookEvent::ReviewCompleted {
                repository_id,
                mr_iid,
                outcome,
                summary,
                url,
            } => {
                let record = self
                    .db
                    .apply_review(ReviewApply::Completion {
                        repository_id,
                        mr_iid,
                        outcome,
                        summary,
                        url,
                    })
                    .await?;
                Ok(Some(record))
            }
            WebhookEvent::PipelineCompleted {
                repository_id,
                status,
            } => {
                debug!(repository_id, status, "pipeline event received");
                Ok(None)
            }
            WebhookEvent::Unknown { kind } => {
                debug!(kind, "ignoring unrecognized webhook event");
                Ok(None)
            }
        }
    }

    /// All review records for repositories installed by this account,
    /// newest first. Pure read, never blocks on the provider.
    pub async fn overview(&self, account_id: i64) -> Result<Vec<DbReviewRecord>, RevlinkError> {
        self.db.list_reviews(account_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_merge_request_open() {
        let payload = json!({
            "object_kind": "merge_request",
            "project": { "id": 42 },
            "object_attributes": {
                "iid": 7,
                "title": "Fix bug",
                "source_branch": "fix/x",
                "url": "https://gitlab.example/demo/-/merge_requests/7",
                "last_commit": { "id": "abc123" },
                "action": "open"
            }
        });
        assert_eq!(
            WebhookEvent::parse(&payload),
            WebhookEvent::MergeRequestOpened {
                repository_id: 42,
                mr_iid: 7,
                title: Some("Fix bug".to_string()),
                branch: Some("fix/x".to_string()),
                url: Some("https://gitlab.example/demo/-/merge_requests/7".to_string()),
                revision: Some("abc123".to_string()),
            }
        );
    }

    #[test]
    fn revision_falls_back_to_the_attribute_timestamp() {
        let payload = json!({
            "object_kind": "merge_request",
            "project": { "id": 42 },
            "object_attributes": {
                "iid": 7,
                "updated_at": "2026-08-30 10:00:00 UTC",
                "action": "open"
            }
        });
        assert!(matches!(
            WebhookEvent::parse(&payload),
            WebhookEvent::MergeRequestOpened { revision: Some(r), .. }
                if r == "2026-08-30 10:00:00 UTC"
        ));
    }

    #[test]
    fn parses_merge_request_update_action() {
        let payload = json!({
            "object_kind": "merge_request",
            "project": { "id": 42 },
            "object_attributes": { "iid": 7, "action": "update" }
        });
        assert!(matches!(
            WebhookEvent::parse(&payload),
            WebhookEvent::MergeRequestUpdated {
                repository_id: 42,
                mr_iid: 7,
                ..
            }
        ));
    }

    #[test]
    fn unhandled_merge_request_action_is_unknown() {
        let payload = json!({
            "object_kind": "merge_request",
            "project": { "id": 42 },
            "object_attributes": { "iid": 7, "action": "close" }
        });
        assert_eq!(
            WebhookEvent::parse(&payload),
            WebhookEvent::Unknown {
                kind: "merge_request/close".to_string()
            }
        );
    }

    #[test]
    fn missing_iid_is_unknown_not_fatal() {
        let payload = json!({
            "object_kind": "merge_request",
            "project": { "id": 42 },
            "object_attributes": { "title": "no iid here" }
        });
        assert_eq!(
            WebhookEvent::parse(&payload),
            WebhookEvent::Unknown {
                kind: "merge_request/malformed".to_string()
            }
        );
    }

    #[test]
    fn unknown_object_kind_is_ignored() {
        let payload = json!({ "object_kind": "wiki_page" });
        assert_eq!(
            WebhookEvent::parse(&payload),
            WebhookEvent::Unknown {
                kind: "wiki_page".to_string()
            }
        );
    }

    #[test]
    fn parses_pipeline_event() {
        let payload = json!({
            "object_kind": "pipeline",
            "project": { "id": 42 },
            "object_attributes": { "status": "success" }
        });
        assert_eq!(
            WebhookEvent::parse(&payload),
            WebhookEvent::PipelineCompleted {
                repository_id: 42,
                status: "success".to_string()
            }
        );
    }
}

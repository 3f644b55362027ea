use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Installation lifecycle. Stored lowercase; serialized to the API in the
/// capitalized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum InstallStatus {
    Pending,
    Active,
    Failed,
}

/// Review lifecycle for one merge request. `Reviewed`/`Failed` are terminal
/// until a new merge-request revision restarts the record to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Reviewed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbAccount {
    pub id: i64,
    pub provider: String,
    pub base_url: String,
    pub username: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    /// Provider credential. Never serialized across the trust boundary.
    #[serde(skip_serializing)]
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbInstallation {
    pub repository_id: i64,
    pub account_id: i64,
    pub webhook_id: Option<i64>,
    pub callback_url: String,
    pub status: InstallStatus,
    pub error: Option<String>,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbReviewRecord {
    pub id: i64,
    pub repository_id: i64,
    pub mr_iid: i64,
    pub title: Option<String>,
    pub branch: Option<String>,
    /// Marker for the merge-request revision this record tracks. Used to
    /// tell a redelivered duplicate from a genuinely new revision.
    pub revision: Option<String>,
    pub status: ReviewStatus,
    pub summary: Option<String>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

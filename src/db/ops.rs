//! Write-side inputs for the DB actor.
//!
//! These sit next to the actor because they carry SQL/table knowledge:
//! the upsert targets and conflict keys mirror the schema.

use crate::db::models::{InstallStatus, ReviewStatus};

/// Upsert for the `accounts` table, keyed by (provider, base_url, username).
/// A reconnect with a new token overwrites the stored credential.
#[derive(Debug, Clone)]
pub struct AccountUpsert {
    pub base_url: String,
    pub username: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub token: String,
}

/// Upsert for the `installations` table, keyed by (repository_id, account_id).
#[derive(Debug, Clone)]
pub struct InstallationUpsert {
    pub repository_id: i64,
    pub account_id: i64,
    pub webhook_id: Option<i64>,
    pub callback_url: String,
    pub status: InstallStatus,
    pub error: Option<String>,
}

/// One webhook-delivered fact to fold into a review record.
///
/// Applied inside the actor so that events for the same key land in mailbox
/// (arrival) order.
#[derive(Debug, Clone)]
pub enum ReviewApply {
    /// A merge-request revision (opened/updated). Restarts the record to
    /// `Pending`, even from a terminal status, unless the revision marker
    /// matches the one already tracked (a redelivered duplicate).
    Revision {
        repository_id: i64,
        mr_iid: i64,
        title: Option<String>,
        branch: Option<String>,
        url: Option<String>,
        revision: Option<String>,
    },
    /// A finished review computation. Terminal until the next revision.
    Completion {
        repository_id: i64,
        mr_iid: i64,
        outcome: ReviewStatus,
        summary: Option<String>,
        url: Option<String>,
    },
}

impl ReviewApply {
    pub fn key(&self) -> (i64, i64) {
        match self {
            Self::Revision {
                repository_id,
                mr_iid,
                ..
            }
            | Self::Completion {
                repository_id,
                mr_iid,
                ..
            } => (*repository_id, *mr_iid),
        }
    }
}

//! Repository discovery for a linked account.

use crate::credentials::CredentialStore;
use crate::error::RevlinkError;
use crate::gitlab::{GitlabClient, GitlabProject};
use serde::Serialize;

/// Stable internal repository shape, reconstructed on every `list` call and
/// never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub visibility: Option<String>,
    pub web_url: String,
}

impl From<GitlabProject> for Repository {
    fn from(p: GitlabProject) -> Self {
        Self {
            id: p.id,
            name: p.name_with_namespace,
            path: p.path_with_namespace,
            visibility: p.visibility,
            web_url: p.web_url,
        }
    }
}

#[derive(Clone)]
pub struct RepositoryCatalog {
    credentials: CredentialStore,
    gitlab: GitlabClient,
}

impl RepositoryCatalog {
    pub fn new(credentials: CredentialStore, gitlab: GitlabClient) -> Self {
        Self { credentials, gitlab }
    }

    /// Fetches the account's repositories, paginating until exhausted.
    /// Materialized once per call; on any upstream failure the partial
    /// result is discarded rather than returned as an inconsistent catalog.
    pub async fn list(&self, account_id: i64) -> Result<Vec<Repository>, RevlinkError> {
        let cred = self.credentials.get(account_id).await?;
        let projects = self
            .gitlab
            .list_projects(&cred.base_url, &cred.token)
            .await?;
        Ok(projects.into_iter().map(Repository::from).collect())
    }
}

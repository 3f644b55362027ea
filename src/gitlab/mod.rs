//! GitLab provider plumbing: wire types, the REST client, and the OAuth
//! endpoints. The provider's own semantics are treated as opaque; this
//! module only knows the handful of endpoints the core needs.

pub mod client;
pub mod oauth;

pub use client::GitlabClient;

use serde::{Deserialize, Serialize};

/// `GET /api/v4/user` response subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitlabIdentity {
    pub id: i64,
    pub username: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// `GET /api/v4/projects` response subset.
#[derive(Debug, Clone, Deserialize)]
pub struct GitlabProject {
    pub id: i64,
    pub name_with_namespace: String,
    pub path_with_namespace: String,
    pub visibility: Option<String>,
    pub web_url: String,
    pub avatar_url: Option<String>,
}

/// `GET /api/v4/projects/:id/hooks` response subset.
#[derive(Debug, Clone, Deserialize)]
pub struct GitlabHook {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub merge_requests_events: bool,
    #[serde(default)]
    pub pipeline_events: bool,
}

/// Joins an instance base URL with an API path.
pub(crate) fn api_root(base_url: &str) -> String {
    format!("{}/api/v4", base_url.trim_end_matches('/'))
}

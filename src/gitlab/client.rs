use crate::config::GitlabConfig;
use crate::error::RevlinkError;
use crate::gitlab::{GitlabHook, GitlabIdentity, GitlabProject, api_root};
use axum::http::StatusCode;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::warn;

const NEXT_PAGE_HEADER: &str = "x-next-page";
const ERROR_BODY_PREVIEW: usize = 200;

/// Thin GitLab REST client.
///
/// Reads retry transient failures with exponential backoff; writes (hook
/// creation/deletion, notes) are sent exactly once so a slow provider can
/// never be double-mutated by us.
#[derive(Clone)]
pub struct GitlabClient {
    http: reqwest::Client,
    retry_policy: ExponentialBuilder,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct MrChange {
    #[serde(default)]
    diff: String,
}

#[derive(Debug, Deserialize)]
struct MrChanges {
    #[serde(default)]
    changes: Vec<MrChange>,
    web_url: Option<String>,
}

/// Combined diff plus the merge request's web URL, when the provider
/// supplies one.
#[derive(Debug, Clone)]
pub struct MergeRequestDiff {
    pub diff: String,
    pub web_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct HookCreateBody<'a> {
    url: &'a str,
    token: &'a str,
    push_events: bool,
    merge_requests_events: bool,
    pipeline_events: bool,
    tag_push_events: bool,
    enable_ssl_verification: bool,
}

impl GitlabClient {
    pub fn new(cfg: &GitlabConfig, http: reqwest::Client) -> Self {
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_max_times(cfg.retry_max_times)
            .with_jitter();
        Self {
            http,
            retry_policy,
            page_size: cfg.page_size,
        }
    }

    /// `GET /user`: resolves whose token this is. Pure read; used both for
    /// pre-commit token validation and to key the account row.
    pub async fn current_user(
        &self,
        base_url: &str,
        token: &str,
    ) -> Result<GitlabIdentity, RevlinkError> {
        let url = format!("{}/user", api_root(base_url));
        let resp = self.get_with_retry(&url, token).await?;
        let resp = expect_success(resp).await?;
        let identity = resp.json().await.map_err(classify_transport)?;
        Ok(identity)
    }

    /// Pages through `GET /projects?membership=true` until exhausted.
    /// Any page failure discards everything collected so far.
    pub async fn list_projects(
        &self,
        base_url: &str,
        token: &str,
    ) -> Result<Vec<GitlabProject>, RevlinkError> {
        let mut page = 1u32;
        let mut all = Vec::new();
        loop {
            let url = format!(
                "{}/projects?membership=true&per_page={}&page={}",
                api_root(base_url),
                self.page_size,
                page
            );
            let resp = self.get_with_retry(&url, token).await?;
            let resp = expect_success(resp).await?;
            let next_page = resp
                .headers()
                .get(NEXT_PAGE_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok());
            let batch: Vec<GitlabProject> = resp.json().await.map_err(classify_transport)?;
            let exhausted = batch.is_empty();
            all.extend(batch);
            match next_page {
                Some(next) if !exhausted => page = next,
                _ => break,
            }
        }
        Ok(all)
    }

    /// `GET /projects/:id/hooks`.
    pub async fn list_hooks(
        &self,
        base_url: &str,
        token: &str,
        project_id: i64,
    ) -> Result<Vec<GitlabHook>, RevlinkError> {
        let url = format!("{}/projects/{}/hooks", api_root(base_url), project_id);
        let resp = self.get_with_retry(&url, token).await?;
        let resp = expect_success(resp).await?;
        let hooks = resp.json().await.map_err(classify_transport)?;
        Ok(hooks)
    }

    /// `POST /projects/:id/hooks`: subscribes to merge-request and pipeline
    /// events. Never retried. Any refusal keeps its provider status: a 403
    /// here usually means the user lacks Maintainer rights on the project,
    /// not that the token is bad, and the installer records the reason.
    pub async fn create_hook(
        &self,
        base_url: &str,
        token: &str,
        project_id: i64,
        callback_url: &str,
        secret: &str,
    ) -> Result<GitlabHook, RevlinkError> {
        let url = format!("{}/projects/{}/hooks", api_root(base_url), project_id);
        let body = HookCreateBody {
            url: callback_url,
            token: secret,
            push_events: false,
            merge_requests_events: true,
            pipeline_events: true,
            tag_push_events: false,
            enable_ssl_verification: true,
        };
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        if !resp.status().is_success() {
            return Err(provider_status(resp).await);
        }
        let hook = resp.json().await.map_err(classify_transport)?;
        Ok(hook)
    }

    /// `DELETE /projects/:id/hooks/:hook_id`. A 404 means the hook is
    /// already gone, which is what the caller wanted.
    pub async fn delete_hook(
        &self,
        base_url: &str,
        token: &str,
        project_id: i64,
        hook_id: i64,
    ) -> Result<(), RevlinkError> {
        let url = format!(
            "{}/projects/{}/hooks/{}",
            api_root(base_url),
            project_id,
            hook_id
        );
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(resp).await?;
        Ok(())
    }

    /// `GET /projects/:id/merge_requests/:iid/changes`: the concatenated
    /// diff for the current revision.
    pub async fn merge_request_diff(
        &self,
        base_url: &str,
        token: &str,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<MergeRequestDiff, RevlinkError> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/changes",
            api_root(base_url),
            project_id,
            mr_iid
        );
        let resp = self.get_with_retry(&url, token).await?;
        let resp = expect_success(resp).await?;
        let body: MrChanges = resp.json().await.map_err(classify_transport)?;
        let diff = body
            .changes
            .iter()
            .map(|c| c.diff.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(MergeRequestDiff {
            diff,
            web_url: body.web_url,
        })
    }

    /// `POST /projects/:id/merge_requests/:iid/notes`: publishes the review
    /// as a comment. Never retried.
    pub async fn post_mr_note(
        &self,
        base_url: &str,
        token: &str,
        project_id: i64,
        mr_iid: i64,
        note: &str,
    ) -> Result<(), RevlinkError> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/notes",
            api_root(base_url),
            project_id,
            mr_iid
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "body": note }))
            .send()
            .await
            .map_err(classify_transport)?;
        expect_success(resp).await?;
        Ok(())
    }

    /// GET with backoff on transport errors and 5xx. GitLab accepts both
    /// personal access tokens and OAuth access tokens as bearer tokens, so
    /// one auth scheme covers both link paths.
    async fn get_with_retry(
        &self,
        url: &str,
        token: &str,
    ) -> Result<reqwest::Response, RevlinkError> {
        let client = self.http.clone();
        let url = url.to_string();
        let token = token.to_string();
        (move || {
            let client = client.clone();
            let url = url.clone();
            let token = token.clone();
            async move {
                let resp = client.get(&url).bearer_auth(&token).send().await?;
                if resp.status().is_server_error() {
                    let status = resp.status();
                    warn!("GitLab server error (will retry): {}", status);
                    return Err(resp.error_for_status().unwrap_err());
                }
                Ok(resp)
            }
        })
        .retry(self.retry_policy)
        .await
        .map_err(classify_transport)
    }
}

/// Connect failures and timeouts are `Unreachable`; everything else keeps
/// its reqwest shape.
fn classify_transport(err: reqwest::Error) -> RevlinkError {
    if err.is_connect() || err.is_timeout() {
        RevlinkError::Unreachable(err)
    } else {
        RevlinkError::Http(err)
    }
}

/// Maps a non-success provider status to the error taxonomy: 401/403 on a
/// read means the token's fault, everything else is the provider's.
async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response, RevlinkError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RevlinkError::InvalidToken);
    }
    Err(provider_status(resp).await)
}

/// Preserves the provider's status and a body preview.
async fn provider_status(resp: reqwest::Response) -> RevlinkError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let body = body
        .char_indices()
        .nth(ERROR_BODY_PREVIEW)
        .map(|(idx, _)| format!("{}...<truncated>", &body[..idx]))
        .unwrap_or(body);
    RevlinkError::ProviderStatus { status, body }
}

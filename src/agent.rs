//! Review computation dispatch.
//!
//! The review itself is a black box behind `ReviewAgent`; this module only
//! wires it to the lifecycle: fetch the diff, run the agent, publish the
//! note, then feed the outcome back into the tracker as a completion event.

use crate::config::AgentConfig;
use crate::credentials::CredentialStore;
use crate::db::{DbHandle, ReviewStatus};
use crate::error::RevlinkError;
use crate::gitlab::GitlabClient;
use crate::tracker::{ReviewTracker, WebhookEvent};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Context handed to the agent alongside the diff.
#[derive(Debug, Clone)]
pub struct ReviewContext {
    pub repository_id: i64,
    pub mr_iid: i64,
    pub title: Option<String>,
    pub branch: Option<String>,
}

#[async_trait]
pub trait ReviewAgent: Send + Sync {
    /// Produces the review text for a diff. Opaque to the rest of the core.
    async fn review(&self, ctx: &ReviewContext, diff: &str) -> Result<String, RevlinkError>;
}

/// Runs a local command with the prompt on stdin and takes stdout as the
/// review. Matches the original deployment shape of shelling out to a local
/// model runner.
pub struct CommandAgent {
    command: String,
    args: Vec<String>,
}

impl CommandAgent {
    pub fn from_config(cfg: &AgentConfig) -> Option<Arc<dyn ReviewAgent>> {
        let command = cfg.command.as_ref()?.trim().to_string();
        if command.is_empty() {
            return None;
        }
        Some(Arc::new(Self {
            command,
            args: cfg.args.clone(),
        }))
    }
}

#[async_trait]
impl ReviewAgent for CommandAgent {
    async fn review(&self, ctx: &ReviewContext, diff: &str) -> Result<String, RevlinkError> {
        let prompt = format!(
            "You are a code reviewer. Analyze this merge request diff and give \
             constructive feedback.\n\nTitle: {}\nBranch: {}\n\n{}",
            ctx.title.as_deref().unwrap_or("(untitled)"),
            ctx.branch.as_deref().unwrap_or("(unknown)"),
            diff
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(RevlinkError::Unexpected(format!(
                "review command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Dependencies the background review task needs. Everything is cheap to
/// clone; the task owns its copies.
#[derive(Clone)]
pub struct ReviewDispatcher {
    pub agent: Arc<dyn ReviewAgent>,
    pub db: DbHandle,
    pub credentials: CredentialStore,
    pub gitlab: GitlabClient,
    pub tracker: ReviewTracker,
    pub max_diff_bytes: usize,
}

impl ReviewDispatcher {
    /// Kicks off the review for a pending merge request in the background.
    /// The webhook handler returns immediately; the outcome arrives later
    /// as a `ReviewCompleted` event.
    pub fn spawn(&self, ctx: ReviewContext) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let repository_id = ctx.repository_id;
            let mr_iid = ctx.mr_iid;
            let (outcome, summary, url) = match this.run(&ctx).await {
                Ok((summary, url)) => {
                    info!(repository_id, mr_iid, "review completed");
                    (ReviewStatus::Reviewed, Some(summary), url)
                }
                Err(e) => {
                    error!(repository_id, mr_iid, error = %e, "review failed");
                    (ReviewStatus::Failed, Some(format!("review failed: {e}")), None)
                }
            };
            let applied = this
                .tracker
                .on_webhook_event(WebhookEvent::ReviewCompleted {
                    repository_id,
                    mr_iid,
                    outcome,
                    summary,
                    url,
                })
                .await;
            if let Err(e) = applied {
                error!(repository_id, mr_iid, error = %e, "could not record review outcome");
            }
        })
    }

    async fn run(&self, ctx: &ReviewContext) -> Result<(String, Option<String>), RevlinkError> {
        // The inbound webhook does not say which account installed the
        // hook; the active installation for the repository does.
        let Some(installation) = self.db.get_active_installation(ctx.repository_id).await? else {
            warn!(
                repository_id = ctx.repository_id,
                "merge request event for a repository with no active installation"
            );
            return Err(RevlinkError::NotLinked);
        };
        let cred = self.credentials.get(installation.account_id).await?;

        let mut mr = self
            .gitlab
            .merge_request_diff(&cred.base_url, &cred.token, ctx.repository_id, ctx.mr_iid)
            .await?;
        if mr.diff.len() > self.max_diff_bytes {
            let mut cut = self.max_diff_bytes;
            while !mr.diff.is_char_boundary(cut) {
                cut -= 1;
            }
            mr.diff.truncate(cut);
        }

        let summary = self.agent.review(ctx, &mr.diff).await?;

        self.gitlab
            .post_mr_note(
                &cred.base_url,
                &cred.token,
                ctx.repository_id,
                ctx.mr_iid,
                &summary,
            )
            .await?;

        Ok((summary, mr.web_url))
    }
}

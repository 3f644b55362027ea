//! Idempotent webhook installation.
//!
//! The invariant this module exists for: no two active webhooks ever point
//! at the same callback for the same repository. A duplicate would double-
//! fire every review event downstream.

use crate::credentials::CredentialStore;
use crate::db::{DbHandle, DbInstallation, InstallStatus, InstallationUpsert};
use crate::error::RevlinkError;
use crate::gitlab::GitlabClient;
use ahash::AHashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct WebhookInstaller {
    db: DbHandle,
    credentials: CredentialStore,
    gitlab: GitlabClient,
    webhook_secret: Arc<str>,
    locks: Arc<Mutex<AHashMap<(i64, i64), Arc<tokio::sync::Mutex<()>>>>>,
}

impl WebhookInstaller {
    pub fn new(
        db: DbHandle,
        credentials: CredentialStore,
        gitlab: GitlabClient,
        webhook_secret: Arc<str>,
    ) -> Self {
        Self {
            db,
            credentials,
            gitlab,
            webhook_secret,
            locks: Arc::new(Mutex::new(AHashMap::new())),
        }
    }

    /// Installs (or detects) the review webhook for a repository.
    ///
    /// 1. An existing `Active` installation for this (repository, account)
    ///    is returned unchanged.
    /// 2. A provider hook already pointing at `callback_url` is adopted
    ///    instead of duplicated.
    /// 3. Otherwise a hook subscribed to merge-request and pipeline events
    ///    is created; provider rejection marks the installation `Failed`
    ///    and surfaces the provider's reason. There is no automatic retry:
    ///    the user re-triggers, which re-runs steps 2 and 3.
    ///
    /// Steps 1–3 are serialized per key so concurrent calls cannot race a
    /// duplicate hook into existence.
    pub async fn install(
        &self,
        account_id: i64,
        repository_id: i64,
        callback_url: &str,
    ) -> Result<DbInstallation, RevlinkError> {
        let lock = self.key_lock(repository_id, account_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.db.get_installation(repository_id, account_id).await? {
            if existing.status == InstallStatus::Active {
                debug!(
                    repository_id,
                    account_id, "webhook already active, returning existing installation"
                );
                return Ok(existing);
            }
        }

        let cred = self.credentials.get(account_id).await?;

        let hooks = self
            .gitlab
            .list_hooks(&cred.base_url, &cred.token, repository_id)
            .await?;
        if let Some(hook) = hooks.iter().find(|h| h.url == callback_url) {
            info!(
                repository_id,
                hook_id = hook.id,
                "adopting pre-existing provider webhook"
            );
            return self
                .mark(repository_id, account_id, callback_url, Some(hook.id))
                .await;
        }

        match self
            .gitlab
            .create_hook(
                &cred.base_url,
                &cred.token,
                repository_id,
                callback_url,
                self.webhook_secret.as_ref(),
            )
            .await
        {
            Ok(hook) => {
                info!(repository_id, hook_id = hook.id, "provider webhook created");
                self.mark(repository_id, account_id, callback_url, Some(hook.id))
                    .await
            }
            Err(RevlinkError::ProviderStatus { status, body }) => {
                // Provider refused the hook. Record the failure so the user
                // sees why, then surface it. Terminal for this attempt.
                let reason = format!("{} {}", status.as_u16(), body);
                self.db
                    .upsert_installation(InstallationUpsert {
                        repository_id,
                        account_id,
                        webhook_id: None,
                        callback_url: callback_url.to_string(),
                        status: InstallStatus::Failed,
                        error: Some(reason.clone()),
                    })
                    .await?;
                Err(RevlinkError::InstallError { reason })
            }
            // Transport failures commit nothing; the next attempt re-runs
            // adoption and will find any hook that did get created.
            Err(err) => Err(err),
        }
    }

    /// Deletes the provider webhook if present and removes the installation
    /// row. Idempotent: uninstalling an absent installation is a no-op.
    pub async fn uninstall(&self, account_id: i64, repository_id: i64) -> Result<(), RevlinkError> {
        let lock = self.key_lock(repository_id, account_id);
        let guard = lock.lock().await;

        if let Some(installation) = self.db.get_installation(repository_id, account_id).await? {
            if let Some(hook_id) = installation.webhook_id {
                let cred = self.credentials.get(account_id).await?;
                self.gitlab
                    .delete_hook(&cred.base_url, &cred.token, repository_id, hook_id)
                    .await?;
            }

            self.db
                .delete_installation(repository_id, account_id)
                .await?;
            info!(repository_id, account_id, "webhook uninstalled");
        }

        drop(guard);
        self.release_key_lock(repository_id, account_id, &lock);
        Ok(())
    }

    async fn mark(
        &self,
        repository_id: i64,
        account_id: i64,
        callback_url: &str,
        webhook_id: Option<i64>,
    ) -> Result<DbInstallation, RevlinkError> {
        let result = self
            .db
            .upsert_installation(InstallationUpsert {
                repository_id,
                account_id,
                webhook_id,
                callback_url: callback_url.to_string(),
                status: InstallStatus::Active,
                error: None,
            })
            .await;
        match result {
            Err(RevlinkError::Database(e)) if is_active_unique_violation(&e) => {
                // Another account already holds the active installation for
                // this repository; the storage-level partial index is the
                // last line of defense for the one-active-hook invariant.
                Err(RevlinkError::InstallError {
                    reason: "an active webhook already exists for this repository".to_string(),
                })
            }
            other => other,
        }
    }

    /// Adoption-only repair: if the provider already has a hook at the
    /// recorded callback URL, activate the installation around it. Never
    /// creates a hook; creation stays a user-triggered action.
    async fn try_adopt(
        &self,
        account_id: i64,
        repository_id: i64,
        callback_url: &str,
    ) -> Result<Option<DbInstallation>, RevlinkError> {
        let lock = self.key_lock(repository_id, account_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.db.get_installation(repository_id, account_id).await? {
            if existing.status == InstallStatus::Active {
                return Ok(Some(existing));
            }
        }

        let cred = self.credentials.get(account_id).await?;
        let hooks = self
            .gitlab
            .list_hooks(&cred.base_url, &cred.token, repository_id)
            .await?;
        match hooks.iter().find(|h| h.url == callback_url) {
            Some(hook) => self
                .mark(repository_id, account_id, callback_url, Some(hook.id))
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    fn key_lock(&self, repository_id: i64, account_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("installer lock map poisoned");
        locks
            .entry((repository_id, account_id))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops a key's map entry once no other task holds it, so the lock map
    /// does not accumulate entries for uninstalled repositories.
    fn release_key_lock(
        &self,
        repository_id: i64,
        account_id: i64,
        lock: &Arc<tokio::sync::Mutex<()>>,
    ) {
        let mut locks = self.locks.lock().expect("installer lock map poisoned");
        // Two strong refs are the map's and the caller's; more means another
        // task still waits on this key.
        if Arc::strong_count(lock) == 2 {
            locks.remove(&(repository_id, account_id));
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().expect("installer lock map poisoned").len()
    }
}

fn is_active_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.message().contains("idx_installations_active"))
}

/// Optional reconciliation sweep: periodically re-runs hook adoption for
/// installations that never reached `Active`. Purely restorative; the rest
/// of the core has no correctness dependency on it. Abort the returned
/// handle to cancel.
pub fn spawn_reconciler(
    installer: WebhookInstaller,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let stale = match installer.db.list_stale_installations().await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "reconciler: could not list stale installations");
                    continue;
                }
            };
            for row in stale {
                match installer
                    .try_adopt(row.account_id, row.repository_id, &row.callback_url)
                    .await
                {
                    Ok(Some(inst)) if inst.status == InstallStatus::Active => {
                        info!(
                            repository_id = row.repository_id,
                            "reconciler: installation repaired by adoption"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(
                            repository_id = row.repository_id,
                            error = %e,
                            "reconciler: repair attempt failed"
                        );
                    }
                }
            }
        }
    })
}

//! Credential custody for linked accounts.
//!
//! Tokens live behind this boundary: handlers see account ids and session
//! tokens, never the provider credential itself.

use crate::db::{AccountUpsert, DbAccount, DbHandle};
use crate::error::RevlinkError;
use crate::gitlab::{GitlabClient, GitlabIdentity};

/// The credential needed to call the provider on an account's behalf.
#[derive(Debug, Clone)]
pub struct Credential {
    pub account_id: i64,
    pub base_url: String,
    pub token: String,
}

#[derive(Clone)]
pub struct CredentialStore {
    db: DbHandle,
    gitlab: GitlabClient,
}

impl CredentialStore {
    pub fn new(db: DbHandle, gitlab: GitlabClient) -> Self {
        Self { db, gitlab }
    }

    /// Live "who am I" check against the provider. Mutates nothing: no
    /// account or session is created as a side effect, so callers can give
    /// immediate feedback before committing a credential.
    pub async fn validate_token(
        &self,
        token: &str,
        base_url: &str,
    ) -> Result<GitlabIdentity, RevlinkError> {
        self.gitlab.current_user(base_url, token).await
    }

    /// Stores (or overwrites, on reconnect) the credential for the identity
    /// it belongs to. Subsequent provider calls for this account use the new
    /// token immediately.
    pub async fn put(&self, upsert: AccountUpsert) -> Result<DbAccount, RevlinkError> {
        self.db.upsert_account(upsert).await
    }

    /// Resolves the stored credential for an account.
    pub async fn get(&self, account_id: i64) -> Result<Credential, RevlinkError> {
        let account = self.account(account_id).await?;
        Ok(Credential {
            account_id: account.id,
            base_url: account.base_url,
            token: account.token,
        })
    }

    /// Full account row (for the settings surface; the token field is
    /// never serialized).
    pub async fn account(&self, account_id: i64) -> Result<DbAccount, RevlinkError> {
        self.db
            .get_account(account_id)
            .await?
            .ok_or(RevlinkError::NotLinked)
    }
}

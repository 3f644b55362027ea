use crate::error::RevlinkError;
use base64::Engine as _;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::sync::Cache;
use rand::RngCore;
use serde::Serialize;
use std::time::Duration;

/// A minted session. The token is the only thing that crosses the trust
/// boundary to the client; it proves a prior successful provider
/// authentication and maps back to the account server-side.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub account_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues, validates, and revokes opaque session tokens.
///
/// Sessions live in memory only: a restart invalidates them, which callers
/// cannot distinguish from expiry, and by the session contract they do not
/// need to. Validation never touches the network.
#[derive(Clone)]
pub struct SessionManager {
    cache: Cache<String, Session>,
    ttl_secs: u64,
}

impl SessionManager {
    pub fn new(ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(ttl_secs))
            .max_capacity(100_000)
            .build();
        Self { cache, ttl_secs }
    }

    /// Mints a fresh session for an account. Always a new token; no
    /// terminal session ever re-enters the active state.
    pub fn mint(&self, account_id: i64) -> Session {
        let now = Utc::now();
        let session = Session {
            token: generate_session_token(),
            account_id,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX)),
        };
        self.cache.insert(session.token.clone(), session.clone());
        session
    }

    /// Resolves a token to its account id.
    ///
    /// Missing, revoked, and expired tokens are indistinguishable: all are
    /// `Unauthenticated`.
    pub fn validate(&self, token: &str) -> Result<i64, RevlinkError> {
        let session = self.cache.get(token).ok_or(RevlinkError::Unauthenticated)?;
        if session.expires_at <= Utc::now() {
            self.cache.invalidate(token);
            return Err(RevlinkError::Unauthenticated);
        }
        Ok(session.account_id)
    }

    /// Revokes a token. Revoking an unknown or already-revoked token is a
    /// no-op.
    pub fn revoke(&self, token: &str) {
        self.cache.invalidate(token);
    }

    #[cfg(test)]
    fn insert_with_expiry(&self, account_id: i64, expires_at: DateTime<Utc>) -> String {
        let token = generate_session_token();
        let session = Session {
            token: token.clone(),
            account_id,
            created_at: Utc::now(),
            expires_at,
        };
        self.cache.insert(token.clone(), session);
        token
    }
}

/// 256 bits of randomness, base64url without padding (43 chars).
fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_then_validate_resolves_the_account() {
        let mgr = SessionManager::new(60);
        let session = mgr.mint(7);
        assert_eq!(mgr.validate(&session.token).expect("valid session"), 7);
    }

    #[test]
    fn tokens_are_unique_per_mint() {
        let mgr = SessionManager::new(60);
        let a = mgr.mint(1);
        let b = mgr.mint(1);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn validate_after_revoke_is_unauthenticated() {
        let mgr = SessionManager::new(60);
        let session = mgr.mint(7);
        mgr.revoke(&session.token);
        assert!(matches!(
            mgr.validate(&session.token),
            Err(RevlinkError::Unauthenticated)
        ));
        // Idempotent: revoking again is a no-op, not an error.
        mgr.revoke(&session.token);
    }

    #[test]
    fn validate_past_expiry_is_unauthenticated() {
        let mgr = SessionManager::new(60);
        let token = mgr.insert_with_expiry(7, Utc::now() - ChronoDuration::seconds(1));
        assert!(matches!(
            mgr.validate(&token),
            Err(RevlinkError::Unauthenticated)
        ));
    }

    #[test]
    fn unknown_token_is_unauthenticated() {
        let mgr = SessionManager::new(60);
        assert!(matches!(
            mgr.validate("no-such-token"),
            Err(RevlinkError::Unauthenticated)
        ));
    }
}

use crate::error::RevlinkError;
use crate::server::router::AppState;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;
use subtle::ConstantTimeEq;

const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

/// Extracts and validates the bearer session token. This is the sole
/// authorization boundary for the user-facing API: every privileged handler
/// takes it as an argument.
#[derive(Debug, Clone, Copy)]
pub struct SessionIdentity {
    pub account_id: i64,
}

impl FromRequestParts<AppState> for SessionIdentity {
    type Rejection = RevlinkError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .typed_get::<Authorization<Bearer>>()
            .map(|auth| auth.token().to_string())
            .ok_or(RevlinkError::Unauthenticated)?;
        let account_id = state.sessions.validate(&token)?;
        Ok(Self { account_id })
    }
}

/// Guard for the inbound webhook route. A distinct trust boundary from the
/// session API: the provider proves itself with the shared secret it was
/// given at hook-creation time, compared in constant time, before any
/// payload is parsed.
#[derive(Debug, Clone, Copy)]
pub struct RequireWebhookSecret;

impl FromRequestParts<AppState> for RequireWebhookSecret {
    type Rejection = WebhookAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let supplied = parts
            .headers
            .get(GITLAB_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());

        match supplied {
            Some(secret) => {
                let expected = state.webhook_secret.as_ref();
                if secret.as_bytes().ct_eq(expected.as_bytes()).into() {
                    Ok(Self)
                } else {
                    Err(WebhookAuthError::InvalidSecret)
                }
            }
            None => Err(WebhookAuthError::MissingSecret),
        }
    }
}

pub enum WebhookAuthError {
    MissingSecret,
    InvalidSecret,
}

impl IntoResponse for WebhookAuthError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            Self::MissingSecret => (StatusCode::UNAUTHORIZED, "Missing webhook secret"),
            Self::InvalidSecret => (StatusCode::UNAUTHORIZED, "Invalid webhook secret"),
        };
        (
            status,
            Json(json!({ "error": "unauthorized", "reason": reason })),
        )
            .into_response()
    }
}

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error as ThisError;

use super::IsRetryable;
use super::oauth::OauthError;

#[derive(Debug, ThisError)]
pub enum RevlinkError {
    /// Missing, expired, revoked or unknown session token.
    #[error("Session is missing, expired, or unknown")]
    Unauthenticated,

    /// The provider rejected the credential (401/403).
    #[error("Invalid or unauthorized provider token")]
    InvalidToken,

    /// No credential stored for the account.
    #[error("No provider credential linked for this account")]
    NotLinked,

    /// Could not reach the provider at all (connect failure or timeout).
    #[error("Provider unreachable: {0}")]
    Unreachable(reqwest::Error),

    /// The provider replied with a non-success status we did not expect.
    #[error("Provider error with status {status}: {body}")]
    ProviderStatus { status: StatusCode, body: String },

    /// The provider refused to create the webhook. Terminal for this attempt.
    #[error("Webhook installation failed: {reason}")]
    InstallError { reason: String },

    #[error(transparent)]
    Oauth(#[from] OauthError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ractor error: {0}")]
    Ractor(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl IntoResponse for RevlinkError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                ApiErrorObject {
                    code: "UNAUTHENTICATED".to_string(),
                    message: "Session is missing, expired, or unknown. Reconnect to continue."
                        .to_string(),
                    details: None,
                },
            ),

            Self::InvalidToken => (
                StatusCode::BAD_REQUEST,
                ApiErrorObject {
                    code: "INVALID_TOKEN".to_string(),
                    message: "The provider rejected this token. Check that it is valid and has \
                              api scope."
                        .to_string(),
                    details: None,
                },
            ),

            Self::NotLinked => (
                StatusCode::NOT_FOUND,
                ApiErrorObject {
                    code: "NOT_LINKED".to_string(),
                    message: "No provider credential is linked for this account.".to_string(),
                    details: None,
                },
            ),

            Self::Unreachable(ref err) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorObject {
                    code: "PROVIDER_UNREACHABLE".to_string(),
                    message: format!("Could not connect to the provider: {err}"),
                    details: None,
                },
            ),

            Self::ProviderStatus { status, ref body } => (
                StatusCode::BAD_GATEWAY,
                ApiErrorObject {
                    code: "PROVIDER_ERROR".to_string(),
                    message: format!("Provider error: {} {}", status.as_u16(), body),
                    details: None,
                },
            ),

            Self::InstallError { ref reason } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorObject {
                    code: "INSTALL_FAILED".to_string(),
                    message: format!("The provider refused the webhook: {reason}"),
                    details: None,
                },
            ),

            Self::Oauth(OauthError::Flow {
                code,
                message,
                details,
            }) => (
                StatusCode::FORBIDDEN,
                ApiErrorObject {
                    code,
                    message,
                    details,
                },
            ),

            Self::Json(_) | Self::Oauth(OauthError::Parse { .. }) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorObject {
                    code: "BAD_UPSTREAM_PAYLOAD".to_string(),
                    message: "Failed to parse the provider response.".to_string(),
                    details: None,
                },
            ),

            Self::Http(_)
            | Self::Url(_)
            | Self::Oauth(
                OauthError::Request(_)
                | OauthError::ServerResponse { .. }
                | OauthError::UpstreamStatus(_),
            ) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorObject {
                    code: "PROVIDER_ERROR".to_string(),
                    message: "Provider request failed.".to_string(),
                    details: None,
                },
            ),

            Self::Database(_)
            | Self::Ractor(_)
            | Self::Io(_)
            | Self::Unexpected(_)
            | Self::Oauth(OauthError::Other { .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorObject {
                    code: "INTERNAL_ERROR".to_string(),
                    message: "An internal server error occurred.".to_string(),
                    details: None,
                },
            ),
        };
        (status, Json(ApiErrorBody { inner: error_body })).into_response()
    }
}

/// Standardized API error response payload.
#[derive(Serialize)]
pub struct ApiErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}

impl IsRetryable for RevlinkError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Http(err) => err.is_connect() || err.is_timeout(),
            Self::ProviderStatus { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}

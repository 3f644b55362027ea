mod oauth;
mod revlink;

pub use oauth::OauthError;
pub use revlink::{ApiErrorBody, ApiErrorObject, RevlinkError};

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

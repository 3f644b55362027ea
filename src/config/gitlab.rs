use serde::{Deserialize, Serialize};
use url::Url;

/// GitLab provider settings (`gitlab` table in config.toml).
///
/// The OAuth URLs are overridable so tests can point the flow at a local
/// stand-in instead of the public instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitlabConfig {
    /// Default GitLab instance base URL for OAuth logins. PAT connections
    /// carry their own base URL per request.
    /// TOML: `gitlab.base_url`. Default: `https://gitlab.com`.
    #[serde(default = "default_base_url")]
    pub base_url: Url,

    /// Connect timeout for provider calls, in seconds. Default: `10`.
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Overall request timeout for provider calls, in seconds. Default: `10`.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Page size for repository listing. Default: `100`.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Maximum retry attempts for idempotent provider reads. Default: `2`.
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: usize,

    /// OAuth application client id. Empty disables the OAuth login flow
    /// (PAT connection via `/save-settings` still works).
    #[serde(default)]
    pub oauth_client_id: String,

    /// OAuth application client secret.
    #[serde(default)]
    pub oauth_client_secret: String,

    /// Authorization endpoint. Default: `{base_url}/oauth/authorize`.
    #[serde(default)]
    pub oauth_auth_url: Option<Url>,

    /// Token endpoint. Default: `{base_url}/oauth/token`.
    #[serde(default)]
    pub oauth_token_url: Option<Url>,

    /// Redirect URL registered with the OAuth application.
    /// Default: `http://localhost:8190/auth/gitlab/callback`.
    #[serde(default = "default_redirect_url")]
    pub oauth_redirect_url: Url,
}

impl GitlabConfig {
    pub fn auth_url(&self) -> Url {
        self.oauth_auth_url
            .clone()
            .unwrap_or_else(|| join_base(&self.base_url, "/oauth/authorize"))
    }

    pub fn token_url(&self) -> Url {
        self.oauth_token_url
            .clone()
            .unwrap_or_else(|| join_base(&self.base_url, "/oauth/token"))
    }

    pub fn oauth_enabled(&self) -> bool {
        !self.oauth_client_id.trim().is_empty()
    }
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_timeout_secs(),
            request_timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            retry_max_times: default_retry_max_times(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            oauth_auth_url: None,
            oauth_token_url: None,
            oauth_redirect_url: default_redirect_url(),
        }
    }
}

fn join_base(base: &Url, path: &str) -> Url {
    let trimmed = format!("{}{}", base.as_str().trim_end_matches('/'), path);
    Url::parse(&trimmed).unwrap_or_else(|_| base.clone())
}

fn default_base_url() -> Url {
    Url::parse("https://gitlab.com").expect("valid static url")
}

fn default_redirect_url() -> Url {
    Url::parse("http://localhost:8190/auth/gitlab/callback").expect("valid static url")
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> u32 {
    100
}

fn default_retry_max_times() -> usize {
    2
}

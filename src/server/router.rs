use crate::agent::{CommandAgent, ReviewDispatcher};
use crate::catalog::RepositoryCatalog;
use crate::config::{Config, GitlabConfig};
use crate::credentials::CredentialStore;
use crate::db::DbHandle;
use crate::gitlab::GitlabClient;
use crate::installer::WebhookInstaller;
use crate::server::routes::{auth, health, hooks, repos, reviews, settings, webhook};
use crate::session::SessionManager;
use crate::tracker::ReviewTracker;

use axum::{
    Router,
    extract::{FromRef, Request},
    http::{HeaderName, StatusCode, Version, header::USER_AGENT},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_extra::extract::cookie::Key;
use base64::Engine as _;
use rand::RngCore;
use reqwest::header::HeaderValue;
use std::time::{Duration, Instant};
use std::{sync::Arc, sync::LazyLock};
use tracing::{error, info, warn};

/// Global cookie signing/encryption key for PrivateCookieJar.
static COOKIE_KEY: LazyLock<Key> = LazyLock::new(Key::generate);

const MAX_REQUEST_ID_LEN: usize = 128;
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn generate_request_id() -> String {
    // 96 bits => 16 chars base64url (no padding).
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/?",
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DbHandle,
    pub sessions: SessionManager,
    pub credentials: CredentialStore,
    pub catalog: RepositoryCatalog,
    pub installer: WebhookInstaller,
    pub tracker: ReviewTracker,
    pub dispatcher: Option<ReviewDispatcher>,
    pub gitlab: GitlabClient,
    pub http: reqwest::Client,
    pub webhook_secret: Arc<str>,
}

impl AppState {
    pub fn new(db: DbHandle, config: Arc<Config>) -> Self {
        let http = build_client(&config.gitlab);
        let gitlab = GitlabClient::new(&config.gitlab, http.clone());
        let sessions = SessionManager::new(config.basic.session_ttl_secs);
        let credentials = CredentialStore::new(db.clone(), gitlab.clone());
        let catalog = RepositoryCatalog::new(credentials.clone(), gitlab.clone());
        let webhook_secret: Arc<str> = Arc::from(config.basic.webhook_secret.as_str());
        let installer = WebhookInstaller::new(
            db.clone(),
            credentials.clone(),
            gitlab.clone(),
            webhook_secret.clone(),
        );
        let tracker = ReviewTracker::new(db.clone());
        let dispatcher = CommandAgent::from_config(&config.agent).map(|agent| ReviewDispatcher {
            agent,
            db: db.clone(),
            credentials: credentials.clone(),
            gitlab: gitlab.clone(),
            tracker: tracker.clone(),
            max_diff_bytes: config.agent.max_diff_bytes,
        });

        Self {
            config,
            db,
            sessions,
            credentials,
            catalog,
            installer,
            tracker,
            dispatcher,
            gitlab,
            http,
            webhook_secret,
        }
    }

    /// Callback URL hooks point at when the install request does not name
    /// one: `{public_base_url}/webhook/gitlab`.
    pub fn default_callback_url(&self) -> Option<String> {
        self.config.basic.public_base_url.as_ref().map(|base| {
            format!("{}/webhook/gitlab", base.as_str().trim_end_matches('/'))
        })
    }
}

fn build_client(cfg: &GitlabConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("revlink/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.request_timeout_secs))
        .build()
        .expect("failed to build reqwest client")
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        let _ = state; // state not used to fetch the static key
        COOKIE_KEY.clone()
    }
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn access_log(req: Request, next: Next) -> Response {
    // Capture request metadata before moving `req` into the handler stack.
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let mut resp = next.run(req).await;

    // Always reflect `x-request-id` for easier correlation, even if the
    // client didn't send one.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status();
    let latency_ms = start.elapsed().as_millis();
    let path = uri.path();
    let protocol = format_http_version(version);

    if status.is_server_error() {
        error!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else if status.is_client_error() {
        warn!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else {
        info!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    }

    resp
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health/config", get(health::config_summary))
        .route("/auth/gitlab", get(auth::gitlab_oauth_entry))
        .route("/auth/gitlab/callback", get(auth::gitlab_oauth_callback))
        .route("/validate-token", post(settings::validate_token))
        .route("/save-settings", post(settings::save_settings))
        .route("/settings", get(settings::get_settings))
        .route("/logout", post(auth::logout))
        .route("/repos", get(repos::list_repos))
        .route(
            "/repos/{repository_id}/webhook",
            post(hooks::install_webhook).delete(hooks::uninstall_webhook),
        )
        .route("/reviews", get(reviews::overview))
        .route("/webhook/gitlab", post(webhook::gitlab_webhook))
        .fallback(not_found_handler)
        .with_state(state)
        .layer(middleware::from_fn(access_log))
}

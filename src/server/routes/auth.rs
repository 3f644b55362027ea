use crate::db::AccountUpsert;
use crate::error::{OauthError, RevlinkError};
use crate::gitlab::oauth::GitlabOauthEndpoints;
use crate::server::router::AppState;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use axum_extra::TypedHeader;
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use axum_extra::headers::{Authorization, authorization::Bearer};
use oauth2::{AuthorizationCode, PkceCodeChallenge, PkceCodeVerifier, TokenResponse};
use serde::Deserialize;
use serde_json::{Value, json};
use time::Duration;
use tracing::{error, info};

const CSRF_COOKIE: &str = "gitlab_oauth_csrf_token";
const PKCE_COOKIE: &str = "gitlab_oauth_pkce_verifier";

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: String,
    pub state: String,
}

/// GET /auth/gitlab
///
/// Starts the GitLab OAuth2 PKCE flow and redirects the browser to the
/// instance's authorization page.
pub async fn gitlab_oauth_entry(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, RevlinkError> {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf_token) =
        GitlabOauthEndpoints::build_authorize_url(&state.config.gitlab, challenge)?;

    let jar = jar
        .add(build_cookie(CSRF_COOKIE, csrf_token.secret().to_string()))
        .add(build_cookie(PKCE_COOKIE, verifier.secret().to_string()));

    info!("Dispatching GitLab OAuth redirect to: {}", auth_url);
    Ok((jar, Redirect::temporary(auth_url.as_ref())).into_response())
}

/// GET /auth/gitlab/callback
///
/// Completes the login: exchanges the code, resolves the identity, links
/// the account, and mints the session the client will carry from now on.
pub async fn gitlab_oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<AuthCallbackQuery>,
    jar: PrivateCookieJar,
) -> impl IntoResponse {
    let (jar, flow_cookies) = take_oauth_cookies(jar);

    let result = complete_login(&state, &query.code, &query.state, flow_cookies).await;
    match result {
        Ok(body) => (jar, (StatusCode::OK, Json(body))).into_response(),
        Err(err) => {
            error!("GitLab OAuth failure: {:?}", err);
            (jar, err.into_response()).into_response()
        }
    }
}

/// POST /logout
///
/// Revokes the presented session. Idempotent: an unknown or already-revoked
/// token is a no-op.
pub async fn logout(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> StatusCode {
    if let Some(TypedHeader(auth)) = bearer {
        state.sessions.revoke(auth.token());
    }
    StatusCode::NO_CONTENT
}

async fn complete_login(
    state: &AppState,
    code: &str,
    state_param: &str,
    flow_cookies: Option<(String, String)>,
) -> Result<Value, RevlinkError> {
    let (pkce_verifier, csrf_token) = flow_cookies.ok_or_else(|| OauthError::Flow {
        code: "OAUTH_SESSION_MISSING".to_string(),
        message: "Missing OAuth flow cookies".to_string(),
        details: None,
    })?;

    if state_param != csrf_token {
        return Err(OauthError::Flow {
            code: "CSRF_MISMATCH".to_string(),
            message: "CSRF token mismatch".to_string(),
            details: None,
        }
        .into());
    }

    let token_response = GitlabOauthEndpoints::exchange_authorization_code(
        &state.config.gitlab,
        AuthorizationCode::new(code.to_string()),
        PkceCodeVerifier::new(pkce_verifier),
        state.http.clone(),
    )
    .await?;

    let access_token = token_response.access_token().secret().clone();
    let base_url = state
        .config
        .gitlab
        .base_url
        .as_str()
        .trim_end_matches('/')
        .to_string();

    // The token exchange proves nothing about who authorized; ask the
    // provider before keying the account.
    let identity = state.gitlab.current_user(&base_url, &access_token).await?;

    let account = state
        .credentials
        .put(AccountUpsert {
            base_url,
            username: identity.username,
            name: identity.name,
            avatar_url: identity.avatar_url,
            token: access_token,
        })
        .await?;

    let session = state.sessions.mint(account.id);
    info!(account_id = account.id, username = %account.username, "account linked via OAuth");
    Ok(json!({
        "session": session.token,
        "account_id": account.id,
        "username": account.username,
        "expires_at": session.expires_at,
    }))
}

fn take_oauth_cookies(jar: PrivateCookieJar) -> (PrivateCookieJar, Option<(String, String)>) {
    let csrf = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());
    let pkce = jar.get(PKCE_COOKIE).map(|c| c.value().to_string());

    let jar = jar
        .remove(Cookie::from(CSRF_COOKIE))
        .remove(Cookie::from(PKCE_COOKIE));

    match (pkce, csrf) {
        (Some(p), Some(c)) => (jar, Some((p, c))),
        _ => (jar, None),
    }
}

fn build_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::minutes(15))
        .build()
}

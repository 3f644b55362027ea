use crate::config::GitlabConfig;
use crate::error::OauthError;
use oauth2::{
    AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    StandardRevocableToken, TokenUrl,
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenResponse,
    },
};
use tracing::info;

/// Stateless GitLab OAuth endpoints.
///
/// The client is rebuilt per call from config rather than held in a static:
/// tests point the endpoints at a local stand-in, and a reconfigured
/// instance must take effect without a restart.
pub(crate) struct GitlabOauthEndpoints;

impl GitlabOauthEndpoints {
    /// Build an auth URL with the `api` scope and PKCE challenge preset.
    pub(crate) fn build_authorize_url(
        cfg: &GitlabConfig,
        pkce_challenge: PkceCodeChallenge,
    ) -> Result<(url::Url, CsrfToken), OauthError> {
        let client = build_oauth2_client(cfg)?;
        let (url, csrf) = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge)
            .add_scope(Scope::new("api".to_string()))
            .url();
        Ok((url, csrf))
    }

    /// Exchange an authorization code (PKCE) for tokens.
    pub(crate) async fn exchange_authorization_code(
        cfg: &GitlabConfig,
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
        http_client: reqwest::Client,
    ) -> Result<BasicTokenResponse, OauthError> {
        let client = build_oauth2_client(cfg)?;
        let token_result: BasicTokenResponse = client
            .exchange_code(code)
            .set_pkce_verifier(verifier)
            .request_async(&http_client)
            .await?;
        info!("OAuth2 code exchange completed successfully");
        Ok(token_result)
    }
}

/// Build the GitLab OAuth2 client from config.
fn build_oauth2_client(cfg: &GitlabConfig) -> Result<GitlabOauth2Client, OauthError> {
    let auth_url = AuthUrl::from_url(cfg.auth_url());
    let token_url = TokenUrl::from_url(cfg.token_url());
    let redirect_url = RedirectUrl::from_url(cfg.oauth_redirect_url.clone());

    if !cfg.oauth_enabled() {
        return Err(OauthError::Flow {
            code: "OAUTH_NOT_CONFIGURED".to_string(),
            message: "gitlab.oauth_client_id is not configured; connect with a personal \
                      access token instead."
                .to_string(),
            details: None,
        });
    }

    let client = OAuth2Client::new(ClientId::new(cfg.oauth_client_id.clone()))
        .set_client_secret(ClientSecret::new(cfg.oauth_client_secret.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url);
    Ok(client)
}

pub(crate) type GitlabOauth2Client<
    HasAuthUrl = EndpointSet,
    HasDeviceAuthUrl = EndpointNotSet,
    HasIntrospectionUrl = EndpointNotSet,
    HasRevocationUrl = EndpointNotSet,
    HasTokenUrl = EndpointSet,
> = OAuth2Client<
    BasicErrorResponse,
    BasicTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    HasAuthUrl,
    HasDeviceAuthUrl,
    HasIntrospectionUrl,
    HasRevocationUrl,
    HasTokenUrl,
>;

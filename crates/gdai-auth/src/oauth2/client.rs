//! Refresh-token grant client
//!
//! Runs `grant_type=refresh_token` through an `oauth2` client against
//! `https://{issuer-host}/{tenant}/oauth2/v2.0/token`, where the tenant is the
//! first path segment of the configured issuer URL. Client credentials travel
//! in the form body.

use std::time::Duration;

use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicErrorResponse};
use oauth2::{
    AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use secrecy::ExposeSecret;
use tracing::debug;
use url::Url;

use super::{RefreshError, RefreshedTokens, TokenRefresher};
use crate::config::EntraConfig;

/// `oauth2` client with only the token endpoint set
type RefreshClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Token endpoint client
#[derive(Clone)]
pub struct TokenEndpointClient {
    /// Refresh client, or why no token endpoint could be derived from the issuer
    oauth_client: Result<RefreshClient, String>,

    /// Resolved token endpoint
    token_url: Option<Url>,

    /// Client ID for authentication
    client_id: String,

    /// Scopes negotiated at sign-in
    scopes: Vec<String>,

    /// HTTP client
    http_client: reqwest::Client,
}

// Manual Debug impl to prevent client_secret exposure in logs
impl std::fmt::Debug for TokenEndpointClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEndpointClient")
            .field("token_url", &self.token_url.as_ref().map(Url::as_str))
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("http_client", &"<reqwest::Client>")
            .finish()
    }
}

impl TokenEndpointClient {
    /// Create a client for the configured identity provider application
    ///
    /// # Arguments
    ///
    /// * `config` - Identity provider application settings
    /// * `scope` - Space-separated scope string negotiated at sign-in
    pub fn new(config: &EntraConfig, scope: String) -> Self {
        let token_url = match config.issuer.as_deref() {
            Some(issuer) => token_endpoint(issuer),
            None => Err("issuer is not configured".to_string()),
        };

        let oauth_client = token_url.clone().map(|url| {
            BasicClient::new(ClientId::new(config.client_id.clone()))
                .set_client_secret(ClientSecret::new(
                    config.client_secret.expose_secret().clone(),
                ))
                .set_auth_type(AuthType::RequestBody)
                .set_token_uri(TokenUrl::from_url(url))
        });

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            oauth_client,
            token_url: token_url.ok(),
            client_id: config.client_id.clone(),
            scopes: scope.split_whitespace().map(str::to_string).collect(),
            http_client,
        }
    }

    /// Resolved token endpoint URL, if the issuer yields one
    pub fn token_url(&self) -> Option<&Url> {
        self.token_url.as_ref()
    }
}

#[async_trait]
impl TokenRefresher for TokenEndpointClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError> {
        let client = self
            .oauth_client
            .as_ref()
            .map_err(|reason| RefreshError::EndpointUnavailable(reason.clone()))?;

        let shared_client = self.http_client.clone();
        let http_client = move |request: oauth2::HttpRequest| {
            let shared_client = shared_client.clone();
            async move { execute_oauth_request(&shared_client, request).await }
        };
        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .request_async(&http_client)
            .await
            .map_err(grant_error)?;

        let expires_in = response
            .expires_in()
            .ok_or_else(|| RefreshError::Malformed("missing expires_in".to_string()))?;
        let tokens = RefreshedTokens {
            access_token: response.access_token().secret().clone(),
            expires_in: expires_in.as_secs(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        };

        debug!(
            expires_in = tokens.expires_in,
            rotated = tokens.refresh_token.is_some(),
            "Refresh-token grant succeeded"
        );
        Ok(tokens)
    }
}

fn grant_error(error: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> RefreshError {
    match error {
        RequestTokenError::ServerResponse(response) => RefreshError::Rejected(response.to_string()),
        RequestTokenError::Request(e) => RefreshError::Transport(e.to_string()),
        RequestTokenError::Parse(e, _) => RefreshError::Malformed(e.to_string()),
        RequestTokenError::Other(reason) => RefreshError::Rejected(reason),
    }
}

/// Execute an `oauth2` request on the shared reqwest client
async fn execute_oauth_request(
    client: &reqwest::Client,
    request: oauth2::HttpRequest,
) -> Result<oauth2::HttpResponse, reqwest::Error> {
    let (parts, body) = request.into_parts();

    let response = client
        .request(parts.method, parts.uri.to_string())
        .headers(parts.headers)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    let mut http_response = oauth2::HttpResponse::new(body);
    *http_response.status_mut() = status;
    *http_response.headers_mut() = headers;
    Ok(http_response)
}

/// Derive the v2.0 token endpoint from an issuer URL such as
/// `https://login.microsoftonline.com/{tenant}/v2.0`
///
/// # Errors
///
/// Returns a description when the issuer does not parse or has no tenant segment.
pub fn token_endpoint(issuer: &str) -> Result<Url, String> {
    let parsed = Url::parse(issuer).map_err(|e| format!("invalid issuer URL: {e}"))?;
    let tenant = parsed
        .path_segments()
        .and_then(|mut segments| segments.next())
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| "issuer URL has no tenant segment".to_string())?;

    let origin = parsed.origin().ascii_serialization();
    Url::parse(&format!("{origin}/{tenant}/oauth2/v2.0/token"))
        .map_err(|e| format!("invalid token endpoint: {e}"))
}

//! Confidential client for the identity platform token endpoint
//!
//! Supports the three grants the function needs:
//! - Client credentials (app-only access for webhook processing)
//! - On-behalf-of (JWT bearer assertion, RFC 7523 with `requested_token_use`)
//! - Refresh token (silent renewal of cached delegated tokens)
//!
//! Every acquired token lands in the client's [`CredentialCache`], which
//! [`ConfidentialClient::acquire_silent`] consults before any network call.

use std::sync::Arc;
use std::time::Duration;

use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::http::{self, StatusCode, header};
use oauth2::{
    AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::http_client::{TokenHttpClient, TokenHttpError};
use crate::cache::{CacheKey, CachedCredential, CredentialCache, join_scopes};
use crate::config::ClientCredentials;

/// Grant type for the on-behalf-of exchange
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime assumed when a token response omits `expires_in`
const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3600);

/// Error codes meaning the cached grant cannot be renewed silently
const INTERACTION_REQUIRED_CODES: &[&str] = &[
    "invalid_grant",
    "interaction_required",
    "consent_required",
    "login_required",
];

/// `oauth2` client with only the token endpoint configured
pub type TokenEndpointClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Token request errors
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// No silently usable credential; a full exchange is needed
    #[error("Interaction required: {0}")]
    InteractionRequired(String),

    /// Token endpoint returned an OAuth error
    #[error("Token endpoint error '{error}': {}", .description.as_deref().unwrap_or("no description"))]
    Server {
        /// OAuth error code
        error: String,
        /// `error_description`, if any
        description: Option<String>,
    },

    /// Network failure or timeout
    #[error("Token request failed: {0}")]
    Transport(String),

    /// Response was not a token or error response
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Client cannot be built from its settings
    #[error("Invalid client configuration: {0}")]
    Configuration(String),
}

impl TokenRequestError {
    /// Whether this is the signal to fall back to a full exchange
    pub fn is_interaction_required(&self) -> bool {
        matches!(self, Self::InteractionRequired(_))
    }

    fn from_error_response(response: &BasicErrorResponse) -> Self {
        Self::Server {
            error: response.error().as_ref().to_string(),
            description: response.error_description().cloned(),
        }
    }

    /// Classify a refresh failure: a rejected grant means interaction required
    fn from_silent_failure(error: Self) -> Self {
        match error {
            Self::Server { error, description }
                if INTERACTION_REQUIRED_CODES.contains(&error.as_str()) =>
            {
                Self::InteractionRequired(description.unwrap_or(error))
            }
            other => other,
        }
    }
}

impl From<RequestTokenError<TokenHttpError, BasicErrorResponse>> for TokenRequestError {
    fn from(error: RequestTokenError<TokenHttpError, BasicErrorResponse>) -> Self {
        match error {
            RequestTokenError::ServerResponse(response) => Self::from_error_response(&response),
            RequestTokenError::Request(e) => Self::Transport(e.to_string()),
            RequestTokenError::Parse(e, _) => Self::InvalidResponse(e.to_string()),
            RequestTokenError::Other(message) => Self::InvalidResponse(message),
        }
    }
}

/// Confidential client application
///
/// One instance per app registration. Cloning shares the cache.
#[derive(Clone)]
pub struct ConfidentialClient {
    credentials: ClientCredentials,
    client: TokenEndpointClient,
    http: TokenHttpClient,
    cache: Arc<CredentialCache>,
}

impl std::fmt::Debug for ConfidentialClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidentialClient")
            .field("credentials", &self.credentials)
            .field("cached_tokens", &self.cache.len())
            .finish()
    }
}

impl ConfidentialClient {
    /// Create a client with its own cache
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError::Configuration`] if the token endpoint is
    /// not a valid URL or the HTTP client cannot be built.
    pub fn new(credentials: ClientCredentials) -> Result<Self, TokenRequestError> {
        Self::with_cache(credentials, Arc::new(CredentialCache::new()))
    }

    /// Create a client that stores tokens in a shared cache
    ///
    /// # Errors
    ///
    /// See [`ConfidentialClient::new`].
    pub fn with_cache(
        credentials: ClientCredentials,
        cache: Arc<CredentialCache>,
    ) -> Result<Self, TokenRequestError> {
        let token_url = TokenUrl::new(credentials.token_endpoint.clone()).map_err(|e| {
            TokenRequestError::Configuration(format!(
                "token endpoint '{}': {e}",
                credentials.token_endpoint
            ))
        })?;

        let client = BasicClient::new(ClientId::new(credentials.client_id.clone()))
            .set_client_secret(ClientSecret::new(
                credentials.client_secret.expose_secret().clone(),
            ))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url);

        let http = TokenHttpClient::new(credentials.request_timeout)
            .map_err(|e| TokenRequestError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            credentials,
            client,
            http,
            cache,
        })
    }

    /// Application (client) ID
    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    /// The token cache
    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Return a cached token, renewing it with its refresh token if it is
    /// within its expiry margin
    ///
    /// # Errors
    ///
    /// - [`TokenRequestError::InteractionRequired`] if nothing is cached, the
    ///   entry is stale without a refresh token, or the refresh grant was
    ///   rejected.
    /// - Any other variant if renewal failed for another reason.
    pub async fn acquire_silent<S: AsRef<str>>(
        &self,
        key: &CacheKey,
        scopes: &[S],
    ) -> Result<CachedCredential, TokenRequestError> {
        let Some(cached) = self.cache.get(key) else {
            return Err(TokenRequestError::InteractionRequired(
                "no cached token".to_string(),
            ));
        };

        if cached.is_fresh() {
            debug!(client_id = %self.credentials.client_id, "Token served from cache");
            return Ok(cached);
        }

        let Some(refresh_token) = cached.refresh_token.as_ref() else {
            return Err(TokenRequestError::InteractionRequired(
                "cached token expired".to_string(),
            ));
        };

        let renewed = self
            .refresh(refresh_token, scopes)
            .await
            .map_err(TokenRequestError::from_silent_failure)?;

        // Keep the old refresh token if the endpoint did not rotate it
        let renewed = CachedCredential {
            refresh_token: renewed.refresh_token.or_else(|| cached.refresh_token.clone()),
            ..renewed
        };
        self.cache.put(key.clone(), renewed.clone());
        Ok(renewed)
    }

    /// Client credentials grant
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError`] if the request fails or is rejected.
    pub async fn acquire_for_client<S: AsRef<str>>(
        &self,
        scopes: &[S],
    ) -> Result<CachedCredential, TokenRequestError> {
        info!(
            client_id = %self.credentials.client_id,
            scopes = %join_scopes(scopes),
            "Requesting app-only token"
        );

        let response = self
            .client
            .exchange_client_credentials()
            .add_scopes(to_scopes(scopes))
            .request_async(&self.http)
            .await?;

        Ok(credential_from_response(&response))
    }

    /// Refresh token grant
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError`] if the request fails or is rejected.
    pub async fn refresh<S: AsRef<str>>(
        &self,
        refresh_token: &SecretString,
        scopes: &[S],
    ) -> Result<CachedCredential, TokenRequestError> {
        debug!(client_id = %self.credentials.client_id, "Refreshing cached token");

        let refresh_token = RefreshToken::new(refresh_token.expose_secret().clone());
        let response = self
            .client
            .exchange_refresh_token(&refresh_token)
            .add_scopes(to_scopes(scopes))
            .request_async(&self.http)
            .await?;

        Ok(credential_from_response(&response))
    }

    /// On-behalf-of grant: exchange the caller's token for a downstream token
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError`] if the request fails or is rejected.
    pub async fn acquire_on_behalf_of<S: AsRef<str>>(
        &self,
        assertion: &SecretString,
        scopes: &[S],
    ) -> Result<CachedCredential, TokenRequestError> {
        let scope = join_scopes(scopes);
        info!(
            client_id = %self.credentials.client_id,
            scopes = %scope,
            "Requesting on-behalf-of token"
        );

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT_TYPE)
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("client_secret", self.credentials.client_secret.expose_secret())
            .append_pair("assertion", assertion.expose_secret())
            .append_pair("scope", &scope)
            .append_pair("requested_token_use", "on_behalf_of")
            .finish();

        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(self.credentials.token_endpoint.as_str())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::ACCEPT, "application/json")
            .body(body.into_bytes())
            .map_err(|e| TokenRequestError::Configuration(format!("token request: {e}")))?;

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| TokenRequestError::Transport(e.to_string()))?;

        parse_token_response(response.status(), response.body())
            .map(|token| credential_from_response(&token))
    }
}

fn to_scopes<S: AsRef<str>>(scopes: &[S]) -> impl Iterator<Item = Scope> + '_ {
    scopes.iter().map(|s| Scope::new(s.as_ref().to_string()))
}

fn credential_from_response(response: &BasicTokenResponse) -> CachedCredential {
    CachedCredential::new(
        SecretString::new(response.access_token().secret().clone()),
        response
            .refresh_token()
            .map(|token| SecretString::new(token.secret().clone())),
        response.expires_in().unwrap_or(DEFAULT_EXPIRES_IN),
    )
}

/// Parse a token endpoint response the way `oauth2` does for its own grants
fn parse_token_response(
    status: StatusCode,
    body: &[u8],
) -> Result<BasicTokenResponse, TokenRequestError> {
    if status.is_success() {
        return serde_json::from_slice(body)
            .map_err(|e| TokenRequestError::InvalidResponse(e.to_string()));
    }

    match serde_json::from_slice::<BasicErrorResponse>(body) {
        Ok(error) => {
            warn!(
                status = status.as_u16(),
                error = error.error().as_ref(),
                "Token endpoint rejected request"
            );
            Err(TokenRequestError::from_error_response(&error))
        }
        Err(_) => Err(TokenRequestError::InvalidResponse(format!(
            "HTTP {} without an OAuth error body",
            status.as_u16()
        ))),
    }
}

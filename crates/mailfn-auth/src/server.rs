//! HTTP boundary helpers
//!
//! Glue between an HTTP trigger and the validation / exchange flows:
//! - Reading the `Authorization` header from an [`http::HeaderMap`]
//! - Mapping every failure to a status code, an RFC 6750 `WWW-Authenticate`
//!   challenge and a fixed response body that never carries validation detail
//! - Attaching a downstream bearer token to an outgoing request
//! - [`DelegatedAuth`], the single call a delegated-flow trigger needs

use http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::config::{AuthSettings, ConfigError};
use crate::discovery::DiscoveryError;
use crate::jwt::{TokenValidator, ValidatedIdentity, ValidationError};
use crate::oauth2::TokenRequestError;
use crate::providers::{
    AccessToken, CredentialError, CredentialProvider, DelegatedCredentials, OnBehalfOfExchanger,
};

/// Raw `Authorization` header value, if present and visible ASCII
pub fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION)?.to_str().ok()
}

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No usable bearer credential was presented
    MissingCredentials,
    /// A bearer token was presented and rejected
    InvalidToken,
    /// Caller was valid but no downstream token could be obtained
    CredentialUnavailable,
    /// Deployment is missing required settings
    Misconfigured,
}

impl AuthRejection {
    /// HTTP status for this rejection
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredentials | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::CredentialUnavailable | Self::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `WWW-Authenticate` challenge for 401 responses
    ///
    /// `error="invalid_token"` is only included when a token was presented
    /// (RFC 6750 section 3.1).
    pub fn www_authenticate(&self) -> Option<&'static str> {
        match self {
            Self::MissingCredentials => Some("Bearer"),
            Self::InvalidToken => Some("Bearer error=\"invalid_token\""),
            Self::CredentialUnavailable | Self::Misconfigured => None,
        }
    }

    /// JSON body; fixed per status
    pub fn body(&self) -> Value {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => json!({
                "error": "unauthorized",
                "error_description": "Valid bearer token required",
            }),
            _ => json!({
                "error": "server_error",
                "error_description": "The request could not be completed",
            }),
        }
    }

    /// Complete HTTP response
    ///
    /// # Errors
    ///
    /// Returns an error only if the response cannot be assembled.
    pub fn into_response(self) -> Result<Response<String>, http::Error> {
        let mut builder = Response::builder()
            .status(self.status_code())
            .header(CONTENT_TYPE, "application/json");
        if let Some(challenge) = self.www_authenticate() {
            builder = builder.header(WWW_AUTHENTICATE, challenge);
        }
        builder.body(self.body().to_string())
    }
}

impl std::fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::MissingCredentials => "missing credentials",
            Self::InvalidToken => "invalid token",
            Self::CredentialUnavailable => "downstream credential unavailable",
            Self::Misconfigured => "misconfigured",
        };
        write!(f, "{} ({reason})", self.status_code())
    }
}

impl std::error::Error for AuthRejection {}

impl From<ValidationError> for AuthRejection {
    fn from(error: ValidationError) -> Self {
        match error {
            ValidationError::MissingOrMalformedHeader => Self::MissingCredentials,
            ValidationError::InvalidToken => Self::InvalidToken,
            ValidationError::Misconfigured => Self::Misconfigured,
        }
    }
}

impl From<CredentialError> for AuthRejection {
    fn from(error: CredentialError) -> Self {
        match error {
            CredentialError::Acquisition(_) => Self::CredentialUnavailable,
            CredentialError::Configuration(_) => Self::Misconfigured,
        }
    }
}

impl From<ConfigError> for AuthRejection {
    fn from(_: ConfigError) -> Self {
        Self::Misconfigured
    }
}

/// Set `Authorization: Bearer <token>` on an outgoing request
///
/// # Errors
///
/// Returns the provider's [`CredentialError`], or
/// [`CredentialError::Acquisition`] if the token is not a valid header value.
pub async fn authorize_request<B>(
    provider: &dyn CredentialProvider,
    request: &mut Request<B>,
) -> Result<(), CredentialError> {
    let token = provider.get_access_token().await?;

    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.secret())).map_err(|_| {
        TokenRequestError::InvalidResponse("access token is not a valid header value".to_string())
    })?;
    value.set_sensitive(true);

    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// Validation plus on-behalf-of exchange for one tenant and API audience
#[derive(Debug, Clone)]
pub struct DelegatedAuth {
    tenant_id: String,
    audience: String,
    validator: TokenValidator,
    exchanger: OnBehalfOfExchanger,
}

impl DelegatedAuth {
    /// Compose from parts
    pub fn new(
        tenant_id: impl Into<String>,
        audience: impl Into<String>,
        validator: TokenValidator,
        exchanger: OnBehalfOfExchanger,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            audience: audience.into(),
            validator,
            exchanger,
        }
    }

    /// Build from function settings
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Configuration`] if the tenant or the API app
    /// registration is incomplete.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, CredentialError> {
        let tenant_id = settings.tenant_id()?.to_string();
        let audience = settings.expected_audience()?.to_string();
        let exchanger = OnBehalfOfExchanger::from_settings(settings)?;

        let validator = TokenValidator::from_settings(settings).map_err(|e| {
            error!(error = %e, "Discovery client misconfigured");
            match e {
                DiscoveryError::InvalidAuthority(reason) => ConfigError::Invalid {
                    field: "authority",
                    reason,
                },
                other => ConfigError::ClientSetup(other.to_string()),
            }
        })?;

        Ok(Self::new(tenant_id, audience, validator, exchanger))
    }

    /// The exchanger, for cache inspection
    pub fn exchanger(&self) -> &OnBehalfOfExchanger {
        &self.exchanger
    }

    /// Validate the request's bearer token
    ///
    /// # Errors
    ///
    /// Returns a 401 [`AuthRejection`].
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<ValidatedIdentity, AuthRejection> {
        self.validator
            .validate(bearer_from_headers(headers), &self.tenant_id, &self.audience)
            .await
            .map_err(|e| {
                warn!(tenant_id = %self.tenant_id, reason = %e, "Request rejected");
                AuthRejection::from(e)
            })
    }

    /// Validate the request and get a downstream token for the caller
    ///
    /// # Errors
    ///
    /// Returns a 401 [`AuthRejection`] for header or token failures and a 500
    /// one if the downstream token cannot be obtained.
    pub async fn access_token(
        &self,
        headers: &HeaderMap,
        scopes: &[String],
    ) -> Result<AccessToken, AuthRejection> {
        let identity = self.authenticate(headers).await?;
        Ok(self.exchanger.get_access_token(&identity, scopes).await?)
    }

    /// Validate the request and return a provider acting for the caller
    ///
    /// # Errors
    ///
    /// Returns a 401 [`AuthRejection`] for header or token failures.
    pub async fn provider_for(
        &self,
        headers: &HeaderMap,
        scopes: Vec<String>,
    ) -> Result<DelegatedCredentials, AuthRejection> {
        let identity = self.authenticate(headers).await?;
        Ok(self.exchanger.for_identity(identity, scopes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_from_headers(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_from_headers(&headers), Some("Bearer abc"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AuthRejection::from(ValidationError::MissingOrMalformedHeader).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthRejection::from(ValidationError::InvalidToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthRejection::from(ValidationError::Misconfigured),
            AuthRejection::Misconfigured
        );
        assert_eq!(
            AuthRejection::from(CredentialError::Acquisition(TokenRequestError::Transport(
                "timeout".to_string()
            )))
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AuthRejection::from(ConfigError::Missing("tenant_id")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_challenges() {
        assert_eq!(
            AuthRejection::MissingCredentials.www_authenticate(),
            Some("Bearer")
        );
        assert_eq!(
            AuthRejection::InvalidToken.www_authenticate(),
            Some("Bearer error=\"invalid_token\"")
        );
        assert_eq!(AuthRejection::Misconfigured.www_authenticate(), None);
    }

    #[test]
    fn test_bodies_do_not_distinguish_401_causes() {
        assert_eq!(
            AuthRejection::MissingCredentials.body(),
            AuthRejection::InvalidToken.body()
        );
        assert_eq!(
            AuthRejection::CredentialUnavailable.body(),
            AuthRejection::Misconfigured.body()
        );
    }

    #[test]
    fn test_into_response() {
        let response = AuthRejection::InvalidToken.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[WWW_AUTHENTICATE],
            "Bearer error=\"invalid_token\""
        );
        assert!(response.body().contains("unauthorized"));

        let response = AuthRejection::CredentialUnavailable.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_from_settings_requires_tenant() {
        let settings = AuthSettings::new("", "api-app", "secret");
        assert!(matches!(
            DelegatedAuth::from_settings(&settings),
            Err(CredentialError::Configuration(ConfigError::Missing("tenant_id")))
        ));
    }

    #[test]
    fn test_from_settings_rejects_multi_segment_tenant() {
        let settings = AuthSettings::new("a/b", "api-app", "secret");
        assert!(matches!(
            DelegatedAuth::from_settings(&settings),
            Err(CredentialError::Configuration(ConfigError::Invalid {
                field: "tenant_id",
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_missing_header_is_401_without_network() {
        let settings = AuthSettings::new("tenant", "api-app", "secret");
        let auth = DelegatedAuth::from_settings(&settings).unwrap();

        let rejection = auth
            .access_token(&HeaderMap::new(), &["Mail.Read".to_string()])
            .await
            .unwrap_err();
        assert_eq!(rejection, AuthRejection::MissingCredentials);
        assert!(auth.exchanger().cache().is_empty());
    }
}

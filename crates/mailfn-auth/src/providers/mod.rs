//! Downstream credential providers
//!
//! Two ways to obtain a token for the mail API, behind one trait:
//! - [`DelegatedCredentials`] acts for a validated caller (on-behalf-of),
//!   cached per caller
//! - [`ApplicationCredentialProvider`] acts as the app itself (client
//!   credentials), one cached token for the process
//!
//! Both try the credential cache first and fall back to a network grant.

pub mod application;
pub mod delegated;

pub use application::ApplicationCredentialProvider;
pub use delegated::{DelegatedCredentials, OnBehalfOfExchanger};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::cache::CachedCredential;
use crate::config::ConfigError;
use crate::oauth2::TokenRequestError;

/// Credential acquisition errors
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Token could not be obtained from cache or network
    #[error("Credential acquisition failed: {0}")]
    Acquisition(#[from] TokenRequestError),

    /// Required settings missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl CredentialError {
    /// Map client construction failures, which are always configuration faults
    pub(crate) fn from_client_setup(error: TokenRequestError) -> Self {
        match error {
            TokenRequestError::Configuration(reason) => {
                Self::Configuration(ConfigError::ClientSetup(reason))
            }
            other => Self::Acquisition(other),
        }
    }
}

/// Which flow a provider uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// On behalf of a caller
    Delegated,
    /// App-only
    Application,
}

/// A downstream access token
#[derive(Clone)]
pub struct AccessToken {
    secret: SecretString,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Token value, for the `Authorization` header of downstream calls
    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Expiry reported by the token endpoint
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl From<CachedCredential> for AccessToken {
    fn from(credential: CachedCredential) -> Self {
        Self {
            secret: credential.access_token,
            expires_at: credential.expires_at,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of downstream access tokens
#[async_trait]
pub trait CredentialProvider: Send + Sync + std::fmt::Debug {
    /// Which flow this provider uses
    fn kind(&self) -> ProviderKind;

    /// Scopes requested for every token
    fn scopes(&self) -> &[String];

    /// Get a token, from cache when possible
    async fn get_access_token(&self) -> Result<AccessToken, CredentialError>;
}

//! On-behalf-of credential exchange
//!
//! For a validated caller and a set of scopes:
//! 1. Silent acquisition from the cache, keyed by the caller's subject key and
//!    the scopes (renewing with a refresh token when close to expiry)
//! 2. If that reports interaction required, exchange the caller's token at the
//!    token endpoint and cache the result
//! 3. Any other silent failure is returned as is, without an exchange
//!
//! Callers whose token carried no `oid`/`tid` have no subject key. They skip
//! the cache entirely: every call exchanges and nothing is stored, so two such
//! callers can never be served each other's token.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::{AccessToken, CredentialError, CredentialProvider, ProviderKind};
use crate::cache::{CacheKey, CredentialCache, join_scopes};
use crate::config::AuthSettings;
use crate::jwt::ValidatedIdentity;
use crate::oauth2::{ConfidentialClient, TokenRequestError};

/// Exchanges validated caller tokens for downstream tokens
#[derive(Debug, Clone)]
pub struct OnBehalfOfExchanger {
    client: ConfidentialClient,
}

impl OnBehalfOfExchanger {
    /// Create an exchanger around the API app's confidential client
    pub fn new(client: ConfidentialClient) -> Self {
        Self { client }
    }

    /// Create an exchanger from function settings, with its own cache
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Configuration`] if the API app registration
    /// is incomplete.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, CredentialError> {
        Self::from_settings_with_cache(settings, Arc::new(CredentialCache::new()))
    }

    /// Create an exchanger from function settings that stores tokens in `cache`
    ///
    /// # Errors
    ///
    /// See [`OnBehalfOfExchanger::from_settings`].
    pub fn from_settings_with_cache(
        settings: &AuthSettings,
        cache: Arc<CredentialCache>,
    ) -> Result<Self, CredentialError> {
        let credentials = settings.delegated().inspect_err(|e| {
            error!(error = %e, "Delegated flow misconfigured");
        })?;
        let client = ConfidentialClient::with_cache(credentials, cache)
            .map_err(CredentialError::from_client_setup)?;
        Ok(Self::new(client))
    }

    /// The token cache
    pub fn cache(&self) -> &Arc<CredentialCache> {
        self.client.cache()
    }

    /// Get a downstream token for `identity`
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Acquisition`] if silent acquisition fails
    /// with anything other than interaction required, or if the exchange
    /// fails.
    pub async fn get_access_token(
        &self,
        identity: &ValidatedIdentity,
        scopes: &[String],
    ) -> Result<AccessToken, CredentialError> {
        let key = identity
            .subject_key()
            .map(|subject_key| CacheKey::delegated(subject_key, scopes));

        if let Some(key) = &key {
            match self.client.acquire_silent(key, scopes).await {
                Ok(credential) => {
                    debug!(
                        subject_key = ?identity.subject_key(),
                        "Delegated token acquired silently"
                    );
                    return Ok(credential.into());
                }
                Err(TokenRequestError::InteractionRequired(reason)) => {
                    debug!(
                        subject_key = ?identity.subject_key(),
                        reason = %reason,
                        "Silent acquisition needs exchange"
                    );
                }
                Err(e) => {
                    error!(
                        subject_key = ?identity.subject_key(),
                        error = %e,
                        "Silent token acquisition failed"
                    );
                    return Err(e.into());
                }
            }
        }

        let credential = self
            .client
            .acquire_on_behalf_of(identity.raw_token(), scopes)
            .await
            .inspect_err(|e| {
                error!(
                    subject_key = ?identity.subject_key(),
                    scopes = %join_scopes(scopes),
                    error = %e,
                    "On-behalf-of exchange failed"
                );
            })?;

        match key {
            Some(key) => self.client.cache().put(key, credential.clone()),
            None => info!("Caller has no subject key; exchanged token not cached"),
        }

        Ok(credential.into())
    }

    /// Bind this exchanger to one caller and scope set
    pub fn for_identity(
        &self,
        identity: ValidatedIdentity,
        scopes: Vec<String>,
    ) -> DelegatedCredentials {
        DelegatedCredentials {
            exchanger: self.clone(),
            identity,
            scopes,
        }
    }
}

/// [`CredentialProvider`] acting for one validated caller
#[derive(Debug, Clone)]
pub struct DelegatedCredentials {
    exchanger: OnBehalfOfExchanger,
    identity: ValidatedIdentity,
    scopes: Vec<String>,
}

impl DelegatedCredentials {
    /// The caller this provider acts for
    pub fn identity(&self) -> &ValidatedIdentity {
        &self.identity
    }
}

#[async_trait]
impl CredentialProvider for DelegatedCredentials {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Delegated
    }

    fn scopes(&self) -> &[String] {
        &self.scopes
    }

    async fn get_access_token(&self) -> Result<AccessToken, CredentialError> {
        self.exchanger
            .get_access_token(&self.identity, &self.scopes)
            .await
    }
}

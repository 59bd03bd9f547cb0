//! App-only credentials for the webhook path
//!
//! Notification deliveries carry no caller token, so downstream calls use the
//! webhook app's own identity. The confidential client is built on first use
//! and kept for the process; its token is reused until it nears expiry and
//! is then re-acquired.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, error};

use super::{AccessToken, CredentialError, CredentialProvider, ProviderKind};
use crate::cache::{CacheKey, CredentialCache};
use crate::config::AuthSettings;
use crate::oauth2::{ConfidentialClient, TokenRequestError};

/// App-only token provider
#[derive(Debug)]
pub struct ApplicationCredentialProvider {
    settings: AuthSettings,
    scopes: Vec<String>,
    cache: Arc<CredentialCache>,
    client: OnceCell<ConfidentialClient>,
}

impl ApplicationCredentialProvider {
    /// Create a provider for the configured scopes
    ///
    /// Settings are checked on first use, so a deployment without webhook
    /// credentials can still serve delegated requests.
    pub fn new(settings: AuthSettings) -> Self {
        let scopes = settings.graph_scopes.clone();
        Self::with_scopes(settings, scopes)
    }

    /// Create a provider for explicit scopes
    pub fn with_scopes(settings: AuthSettings, scopes: Vec<String>) -> Self {
        Self {
            settings,
            scopes,
            cache: Arc::new(CredentialCache::new()),
            client: OnceCell::new(),
        }
    }

    /// Store tokens in a shared cache
    pub fn with_cache(mut self, cache: Arc<CredentialCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The token cache
    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    async fn client(&self) -> Result<&ConfidentialClient, CredentialError> {
        self.client
            .get_or_try_init(|| async {
                let credentials = self.settings.application().map_err(|e| {
                    error!(error = %e, "Application flow misconfigured");
                    CredentialError::from(e)
                })?;
                ConfidentialClient::with_cache(credentials, Arc::clone(&self.cache))
                    .map_err(CredentialError::from_client_setup)
            })
            .await
    }
}

#[async_trait]
impl CredentialProvider for ApplicationCredentialProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Application
    }

    fn scopes(&self) -> &[String] {
        &self.scopes
    }

    async fn get_access_token(&self) -> Result<AccessToken, CredentialError> {
        let client = self.client().await?;
        let key = CacheKey::application(client.client_id(), &self.scopes);

        match client.acquire_silent(&key, &self.scopes).await {
            Ok(credential) => return Ok(credential.into()),
            Err(TokenRequestError::InteractionRequired(reason)) => {
                debug!(reason = %reason, "No reusable app-only token");
            }
            Err(e) => return Err(e.into()),
        }

        let credential = client
            .acquire_for_client(&self.scopes)
            .await
            .inspect_err(|e| {
                error!(client_id = client.client_id(), error = %e, "App-only token request failed");
            })?;
        self.cache.put(key, credential.clone());
        Ok(credential.into())
    }
}

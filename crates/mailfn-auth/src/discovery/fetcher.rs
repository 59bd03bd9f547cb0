//! Per-tenant signing context fetcher

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};
use url::Url;

use super::types::{DiscoveryError, OpenIdConfiguration, RawKeySet, SigningContext};
use crate::config::{AuthSettings, is_allowed_endpoint};

/// Outcome of the single discovery attempt for one tenant
type ContextSlot = Arc<OnceCell<Result<Arc<SigningContext>, DiscoveryError>>>;

/// Maximum size of a discovery or key set document
const MAX_DOCUMENT_BYTES: usize = 256 * 1024;

/// Discovery client
///
/// Resolves `{authority}/{tenant}/.well-known/openid-configuration`, then the
/// advertised `jwks_uri`, and keeps the resulting [`SigningContext`] for the
/// life of the process. Each tenant gets exactly one attempt: concurrent first
/// callers share it, and a failed attempt is remembered so an unreachable
/// authority is not hit again by every request.
pub struct DiscoveryClient {
    client: reqwest::Client,
    authority: String,
    contexts: DashMap<String, ContextSlot>,
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("authority", &self.authority)
            .field("tenants", &self.contexts.len())
            .finish()
    }
}

impl DiscoveryClient {
    /// Create a client for an authority base URL
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidAuthority`] if the authority is not an
    /// HTTPS URL (plain HTTP is allowed for localhost), or
    /// [`DiscoveryError::Http`] if the HTTP client cannot be built.
    pub fn new(authority: &str, request_timeout: Duration) -> Result<Self, DiscoveryError> {
        let url = Url::parse(authority)
            .map_err(|e| DiscoveryError::InvalidAuthority(format!("{authority}: {e}")))?;
        if !is_allowed_endpoint(&url) {
            return Err(DiscoveryError::InvalidAuthority(format!(
                "{authority}: https required"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DiscoveryError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            authority: authority.trim_end_matches('/').to_string(),
            contexts: DashMap::new(),
        })
    }

    /// Create a client from function settings
    ///
    /// # Errors
    ///
    /// See [`DiscoveryClient::new`].
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, DiscoveryError> {
        Self::new(&settings.authority, settings.request_timeout())
    }

    /// Signing context for a tenant, fetched on first use
    ///
    /// # Errors
    ///
    /// Returns the [`DiscoveryError`] of the tenant's first attempt, for this
    /// and every later call.
    pub async fn get_signing_context(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<SigningContext>, DiscoveryError> {
        // Clone the slot out so the map shard is not held across the fetch
        let slot = self
            .contexts
            .entry(tenant_id.to_string())
            .or_default()
            .clone();

        if slot.initialized() {
            debug!(tenant_id, "Signing context served from memory");
        }

        slot.get_or_init(|| async {
            self.fetch(tenant_id).await.map(Arc::new).inspect_err(|e| {
                error!(tenant_id, error = %e, "Discovery failed; tenant will reject tokens until restart");
            })
        })
        .await
        .clone()
    }

    /// Number of tenants with a completed attempt (successful or not)
    pub fn resolved_tenants(&self) -> usize {
        self.contexts
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// Discovery document URL for a tenant
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidAuthority`] if the tenant ID is empty
    /// or would escape its path segment.
    pub fn discovery_url(&self, tenant_id: &str) -> Result<String, DiscoveryError> {
        let tenant = tenant_id.trim();
        if tenant.is_empty() || tenant.contains(['/', '?', '#', '\\']) {
            return Err(DiscoveryError::InvalidAuthority(format!(
                "invalid tenant id '{tenant_id}'"
            )));
        }
        Ok(format!(
            "{}/{}/.well-known/openid-configuration",
            self.authority, tenant
        ))
    }

    async fn fetch(&self, tenant_id: &str) -> Result<SigningContext, DiscoveryError> {
        let discovery_url = self.discovery_url(tenant_id)?;
        info!(tenant_id, url = %discovery_url, "Fetching OpenID configuration");

        let document: OpenIdConfiguration = self.get_json(&discovery_url).await?;
        document.validate()?;

        let jwks_url = Url::parse(&document.jwks_uri).map_err(|e| {
            DiscoveryError::InvalidDocument(format!("jwks_uri '{}': {e}", document.jwks_uri))
        })?;
        if !is_allowed_endpoint(&jwks_url) {
            return Err(DiscoveryError::InvalidDocument(format!(
                "jwks_uri '{}' must use https",
                document.jwks_uri
            )));
        }

        let raw_keys: RawKeySet = self.get_json(jwks_url.as_str()).await?;
        let context = SigningContext::new(tenant_id, document.issuer, raw_keys)?;

        info!(
            tenant_id,
            issuer = %context.issuer,
            keys = context.key_count(),
            "Signing context ready"
        );
        Ok(context)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, DiscoveryError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| DiscoveryError::Http(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(content_length) = response.content_length()
            && content_length > MAX_DOCUMENT_BYTES as u64
        {
            return Err(DiscoveryError::InvalidDocument(format!(
                "{url}: response exceeds {MAX_DOCUMENT_BYTES} bytes"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::Http(format!("Failed to read {url}: {e}")))?;
        if body.len() > MAX_DOCUMENT_BYTES {
            return Err(DiscoveryError::InvalidDocument(format!(
                "{url}: response exceeds {MAX_DOCUMENT_BYTES} bytes"
            )));
        }

        serde_json::from_slice(&body)
            .map_err(|e| DiscoveryError::InvalidDocument(format!("{url}: {e}")))
    }
}

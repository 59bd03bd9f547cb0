//! Function App Settings
//!
//! Settings for the bearer-validation and credential-acquisition flows, loaded
//! from an optional file plus `MAILFN_*` environment variables.
//!
//! Presence checks are per flow: [`AuthSettings::delegated`] only requires the
//! API app registration, [`AuthSettings::application`] only the webhook app
//! registration. Both require the tenant.

use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Default identity authority
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Default downstream scope (all statically consented Graph permissions)
pub const DEFAULT_GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Environment variable prefix, e.g. `MAILFN_TENANT_ID`
pub const ENV_PREFIX: &str = "MAILFN";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is missing or empty
    #[error("Required setting missing: '{0}'")]
    Missing(&'static str),

    /// A setting is present but unusable
    #[error("Invalid setting '{field}': {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A client could not be built from otherwise present settings
    #[error("Client setup failed: {0}")]
    ClientSetup(String),

    /// File or environment source could not be read
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

/// Settings shared by the HTTP-triggered functions
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    /// Directory (tenant) ID the API and webhook apps are registered in
    #[serde(default)]
    pub tenant_id: String,

    /// Application ID of the API app; also the expected `aud` of inbound tokens
    #[serde(default)]
    pub api_client_id: String,

    /// Client secret of the API app (used for the on-behalf-of exchange)
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub api_client_secret: SecretString,

    /// Application ID of the webhook app (app-only permissions)
    #[serde(default)]
    pub webhook_client_id: String,

    /// Client secret of the webhook app
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub webhook_client_secret: SecretString,

    /// Identity authority base URL
    #[serde(default = "default_authority")]
    pub authority: String,

    /// Scopes requested for downstream calls
    #[serde(default = "default_graph_scopes")]
    pub graph_scopes: Vec<String>,

    /// Timeout applied to every outbound identity request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Leeway for `exp` / `nbf` checks
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
}

/// Credentials of one confidential client app registration
#[derive(Clone)]
pub struct ClientCredentials {
    /// Tenant the app is registered in
    pub tenant_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Client secret
    pub client_secret: SecretString,
    /// Token endpoint for this tenant
    pub token_endpoint: String,
    /// Timeout for token requests
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_endpoint", &self.token_endpoint)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_graph_scopes() -> Vec<String> {
    vec![DEFAULT_GRAPH_SCOPE.to_string()]
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_clock_skew_secs() -> u64 {
    300
}

impl AuthSettings {
    /// Create settings for the given tenant and API app, everything else defaulted
    pub fn new(
        tenant_id: impl Into<String>,
        api_client_id: impl Into<String>,
        api_client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            api_client_id: api_client_id.into(),
            api_client_secret: SecretString::new(api_client_secret.into()),
            webhook_client_id: String::new(),
            webhook_client_secret: empty_secret(),
            authority: default_authority(),
            graph_scopes: default_graph_scopes(),
            request_timeout_secs: default_request_timeout_secs(),
            clock_skew_secs: default_clock_skew_secs(),
        }
    }

    /// Set the webhook app registration
    pub fn with_webhook_app(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.webhook_client_id = client_id.into();
        self.webhook_client_secret = SecretString::new(client_secret.into());
        self
    }

    /// Override the identity authority (local test servers, sovereign clouds)
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Load settings from a file (TOML, YAML or JSON by extension) overlaid
    /// with `MAILFN_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        use config::{Config, File};

        let settings = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(env_source())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load settings from `MAILFN_*` environment variables only
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a variable cannot be deserialized.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(env_source())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check every required setting for both flows
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.delegated()?;
        self.application()?;
        Ok(())
    }

    /// Credentials of the API app, used for the on-behalf-of exchange
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if the tenant, client ID or secret is empty,
    /// [`ConfigError::Invalid`] if the tenant or authority is unusable.
    pub fn delegated(&self) -> Result<ClientCredentials, ConfigError> {
        self.client_credentials(
            ("api_client_id", &self.api_client_id),
            ("api_client_secret", &self.api_client_secret),
        )
    }

    /// Credentials of the webhook app, used for app-only access
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if the tenant, client ID or secret is empty,
    /// [`ConfigError::Invalid`] if the tenant or authority is unusable.
    pub fn application(&self) -> Result<ClientCredentials, ConfigError> {
        self.client_credentials(
            ("webhook_client_id", &self.webhook_client_id),
            ("webhook_client_secret", &self.webhook_client_secret),
        )
    }

    fn client_credentials(
        &self,
        (id_field, client_id): (&'static str, &String),
        (secret_field, client_secret): (&'static str, &SecretString),
    ) -> Result<ClientCredentials, ConfigError> {
        let tenant_id = self.tenant_id()?;
        require(id_field, client_id)?;
        require(secret_field, client_secret.expose_secret())?;

        Ok(ClientCredentials {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            token_endpoint: self.token_endpoint(tenant_id)?,
            request_timeout: self.request_timeout(),
        })
    }

    /// The tenant ID, checked for presence and for being a single path segment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if empty, [`ConfigError::Invalid`] if it
    /// would change the path of the endpoints built from it.
    pub fn tenant_id(&self) -> Result<&str, ConfigError> {
        require("tenant_id", &self.tenant_id)?;
        check_tenant_segment(&self.tenant_id)?;
        Ok(&self.tenant_id)
    }

    /// The expected audience of inbound tokens, checked for presence
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if empty.
    pub fn expected_audience(&self) -> Result<&str, ConfigError> {
        require("api_client_id", &self.api_client_id)?;
        Ok(&self.api_client_id)
    }

    /// `{authority}/{tenant}/oauth2/v2.0/token`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the authority is not a usable URL
    /// or the tenant is not a single path segment.
    pub fn token_endpoint(&self, tenant_id: &str) -> Result<String, ConfigError> {
        check_tenant_segment(tenant_id)?;
        Ok(format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_base()?,
            tenant_id
        ))
    }

    /// Timeout for outbound identity requests
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Leeway for token lifetime checks
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    fn authority_base(&self) -> Result<&str, ConfigError> {
        check_authority(&self.authority)?;
        Ok(self.authority.trim_end_matches('/'))
    }
}

/// `MAILFN_TENANT_ID`, `MAILFN_GRAPH_SCOPES="a b"`; `__` separates nested keys
fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(" ")
        .with_list_parse_key("graph_scopes")
        .try_parsing(true)
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(field));
    }
    Ok(())
}

fn check_tenant_segment(tenant_id: &str) -> Result<(), ConfigError> {
    let escapes_segment = tenant_id.contains(['/', '?', '#', '\\'])
        || tenant_id.chars().any(char::is_whitespace);
    if escapes_segment {
        return Err(ConfigError::Invalid {
            field: "tenant_id",
            reason: format!("'{tenant_id}' is not a single path segment"),
        });
    }
    Ok(())
}

/// HTTPS only, except loopback hosts
fn check_authority(authority: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        field: "authority",
        reason,
    };

    let url = Url::parse(authority).map_err(|e| invalid(format!("not a URL: {e}")))?;
    if is_allowed_endpoint(&url) {
        Ok(())
    } else {
        Err(invalid(format!(
            "scheme '{}' not allowed (https required outside localhost)",
            url.scheme()
        )))
    }
}

/// HTTPS, or plain HTTP to a loopback test server
pub(crate) fn is_allowed_endpoint(url: &Url) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => matches!(url.host_str(), Some("localhost" | "127.0.0.1")),
        _ => false,
    }
}

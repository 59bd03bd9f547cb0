//! # Mail Function Auth
//!
//! Bearer token validation and downstream credential acquisition for the
//! HTTP-triggered functions of the mail notification sample.
//!
//! ## Flows
//!
//! - **Delegated**: a signed-in caller calls the API with a bearer token. The
//!   token is validated against the tenant's discovered signing keys, then
//!   exchanged on-behalf-of the caller for a mail API token, reusing a cached
//!   token whenever one is still valid.
//! - **Application**: change notifications arrive without a caller token; the
//!   webhook app's own client-credentials token is used instead.
//!
//! ## Architecture
//!
//! - [`config`] - Settings (`MAILFN_*` environment, optional file)
//! - [`discovery`] - Per-tenant issuer and signing keys, fetched once per process
//! - [`jwt`] - Header parsing and token validation
//! - [`cache`] - In-memory credential cache
//! - [`oauth2`] - Confidential client for the token endpoint
//! - [`providers`] - Delegated and application credential providers
//! - [`server`] - Status mapping and request helpers for HTTP triggers
//! - [`logging`] - `tracing` subscriber setup
//!
//! ## Example
//!
//! ```rust,no_run
//! use http::HeaderMap;
//! use mailfn_auth::{AuthSettings, DelegatedAuth};
//!
//! # async fn handler(headers: HeaderMap) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = AuthSettings::from_env()?;
//! let auth = DelegatedAuth::from_settings(&settings)?;
//!
//! match auth.access_token(&headers, &settings.graph_scopes).await {
//!     Ok(token) => println!("downstream token expires at {}", token.expires_at()),
//!     Err(rejection) => {
//!         let _response = rejection.into_response()?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Limitations
//!
//! Signing keys are never refreshed. After the identity provider rotates its
//! keys, tokens are rejected until the process restarts.

pub mod cache;
pub mod config;
pub mod discovery;
pub mod jwt;
pub mod logging;
pub mod oauth2;
pub mod providers;
pub mod server;

pub use cache::{CacheKey, CachedCredential, CredentialCache};
pub use config::{AuthSettings, ClientCredentials, ConfigError};
pub use discovery::{DiscoveryClient, DiscoveryError, SigningContext};
pub use jwt::{TokenClaims, TokenValidator, ValidatedIdentity, ValidationError};
pub use logging::LoggingConfig;
pub use providers::{
    AccessToken, ApplicationCredentialProvider, CredentialError, CredentialProvider,
    DelegatedCredentials, OnBehalfOfExchanger, ProviderKind,
};
pub use server::{AuthRejection, DelegatedAuth, authorize_request, bearer_from_headers};

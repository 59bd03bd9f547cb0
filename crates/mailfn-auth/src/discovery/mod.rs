//! # Tenant Discovery
//!
//! Resolves a tenant's issuer and signing keys from its OpenID Connect
//! discovery document (`/.well-known/openid-configuration`) and the advertised
//! JWKS.
//!
//! Contexts live for the whole process. There is no TTL and no background
//! refresh, so a key rotated by the identity provider only takes effect after a
//! restart; tokens signed with the new key are rejected until then.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mailfn_auth::discovery::DiscoveryClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DiscoveryClient::new("https://login.microsoftonline.com", Duration::from_secs(30))?;
//! let context = client.get_signing_context("contoso.onmicrosoft.com").await?;
//! println!("issuer: {}", context.issuer);
//! # Ok(())
//! # }
//! ```

pub mod fetcher;
pub mod types;

pub use fetcher::DiscoveryClient;
pub use types::{DiscoveryError, OpenIdConfiguration, SigningContext};

//! Discovery document and signing context types

use std::collections::HashMap;

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discovery errors
///
/// `Clone` so a failed fetch can be memoized and handed to every later caller.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// Authority or tenant cannot form a discovery URL
    #[error("Invalid authority: {0}")]
    InvalidAuthority(String),

    /// Transport failure (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Non-success status from the metadata or key endpoint
    #[error("Unexpected status {status} from {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Discovery document missing required fields or not JSON
    #[error("Invalid discovery document: {0}")]
    InvalidDocument(String),

    /// Key set unparseable or holding no usable signing key
    #[error("Invalid signing key set: {0}")]
    InvalidKeySet(String),
}

/// The subset of an OpenID Connect discovery document this crate consumes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenIdConfiguration {
    /// Issuer identifier tokens must carry in `iss`
    pub issuer: String,

    /// Location of the tenant's signing keys
    pub jwks_uri: String,

    /// Token endpoint (informational; grants use the configured endpoint)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Signing algorithms the provider advertises for ID tokens
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_token_signing_alg_values_supported: Vec<String>,

    #[serde(flatten)]
    pub additional_fields: HashMap<String, serde_json::Value>,
}

impl OpenIdConfiguration {
    /// Reject documents with empty required fields
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidDocument`] naming the empty field.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.issuer.trim().is_empty() {
            return Err(DiscoveryError::InvalidDocument(
                "issuer is empty".to_string(),
            ));
        }
        if self.jwks_uri.trim().is_empty() {
            return Err(DiscoveryError::InvalidDocument(
                "jwks_uri is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Issuer and signing keys of one tenant
///
/// Built once per tenant on the first validation and never refreshed; a signing
/// key rotated by the identity provider is only picked up after a restart.
#[derive(Debug, Clone)]
pub struct SigningContext {
    /// Tenant the context belongs to
    pub tenant_id: String,
    /// Expected `iss`
    pub issuer: String,
    /// Asymmetric verification keys
    pub signing_keys: JwkSet,
}

impl SigningContext {
    /// Build a context, keeping only keys usable for signature verification
    ///
    /// Keys of unknown types, symmetric keys and keys marked for encryption
    /// are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidKeySet`] if no usable key remains.
    pub fn new(
        tenant_id: impl Into<String>,
        issuer: impl Into<String>,
        raw_keys: RawKeySet,
    ) -> Result<Self, DiscoveryError> {
        let total = raw_keys.keys.len();
        let keys: Vec<Jwk> = raw_keys
            .keys
            .into_iter()
            .filter_map(|value| serde_json::from_value::<Jwk>(value).ok())
            .filter(is_signing_key)
            .collect();

        if keys.is_empty() {
            return Err(DiscoveryError::InvalidKeySet(format!(
                "none of {total} keys is an asymmetric signing key"
            )));
        }

        Ok(Self {
            tenant_id: tenant_id.into(),
            issuer: issuer.into(),
            signing_keys: JwkSet { keys },
        })
    }

    /// Look up a key by `kid`
    pub fn find_key(&self, kid: &str) -> Option<&Jwk> {
        self.signing_keys.find(kid)
    }

    /// Number of usable keys
    pub fn key_count(&self) -> usize {
        self.signing_keys.keys.len()
    }
}

/// A JWKS document before per-key parsing
///
/// Parsed key by key so one unsupported entry does not invalidate the set.
#[derive(Debug, Clone, Deserialize)]
pub struct RawKeySet {
    /// Raw key objects
    pub keys: Vec<serde_json::Value>,
}

fn is_signing_key(jwk: &Jwk) -> bool {
    use jsonwebtoken::jwk::PublicKeyUse;

    let asymmetric = matches!(
        jwk.algorithm,
        AlgorithmParameters::RSA(_)
            | AlgorithmParameters::EllipticCurve(_)
            | AlgorithmParameters::OctetKeyPair(_)
    );
    let for_signing = !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption));
    asymmetric && for_signing
}

//! Bearer token validation
//!
//! - `bearer` - `Authorization` header parsing
//! - `validator` - signature, issuer, audience and lifetime checks against a
//!   tenant's [`SigningContext`](crate::discovery::SigningContext)
//!
//! A successful validation yields a [`ValidatedIdentity`]; failures collapse to
//! two caller-visible reasons (see [`ValidationError`]).

pub mod bearer;
pub mod validator;

pub use bearer::parse_bearer;
pub use validator::{TokenValidator, ValidationError};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Namespaced alternate name of the `oid` claim
pub const OBJECT_ID_CLAIM_URI: &str =
    "http://schemas.microsoft.com/identity/claims/objectidentifier";

/// Namespaced alternate name of the `tid` claim
pub const TENANT_ID_CLAIM_URI: &str = "http://schemas.microsoft.com/identity/claims/tenantid";

/// Claims read from a validated access token
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenClaims {
    /// Issuer (iss)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject (sub), pairwise per application
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience (aud), a string or an array of strings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,

    /// Expiration Time (exp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Not Before (nbf)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Object ID of the user (oid), stable across applications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,

    /// Tenant ID of the user (tid)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,

    /// Space-separated delegated scopes (scp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scp: Option<String>,

    /// Everything else
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl TokenClaims {
    /// `oid`, or its namespaced alternate
    pub fn object_id(&self) -> Option<&str> {
        self.claim_with_fallback(self.oid.as_deref(), OBJECT_ID_CLAIM_URI)
    }

    /// `tid`, or its namespaced alternate
    pub fn tenant_id(&self) -> Option<&str> {
        self.claim_with_fallback(self.tid.as_deref(), TENANT_ID_CLAIM_URI)
    }

    /// `"{oid}.{tid}"`, or `None` when either part is absent or empty
    pub fn subject_key(&self) -> Option<String> {
        let oid = self.object_id()?;
        let tid = self.tenant_id()?;
        Some(format!("{oid}.{tid}"))
    }

    fn claim_with_fallback<'a>(
        &'a self,
        primary: Option<&'a str>,
        alternate: &str,
    ) -> Option<&'a str> {
        primary
            .or_else(|| {
                self.additional
                    .get(alternate)
                    .and_then(serde_json::Value::as_str)
            })
            .filter(|value| !value.is_empty())
    }
}

/// Result of a successful validation
///
/// Only [`TokenValidator::validate`] constructs it. The raw token is kept for
/// the on-behalf-of exchange and is redacted from `Debug`.
#[derive(Clone)]
pub struct ValidatedIdentity {
    subject_key: Option<String>,
    raw_token: SecretString,
    claims: TokenClaims,
}

impl ValidatedIdentity {
    pub(crate) fn new(raw_token: &str, claims: TokenClaims) -> Self {
        Self {
            subject_key: claims.subject_key(),
            raw_token: SecretString::new(raw_token.to_string()),
            claims,
        }
    }

    /// `"{oid}.{tid}"`; `None` for tokens without both claims
    pub fn subject_key(&self) -> Option<&str> {
        self.subject_key.as_deref()
    }

    /// The bearer token as presented
    pub fn raw_token(&self) -> &SecretString {
        &self.raw_token
    }

    /// Validated claims
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }
}

impl std::fmt::Debug for ValidatedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedIdentity")
            .field("subject_key", &self.subject_key)
            .field("raw_token", &"[REDACTED]")
            .finish()
    }
}

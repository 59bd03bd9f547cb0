//! Access token validation against a tenant's discovered signing context
//!
//! Checks, in order:
//! - `Authorization` header is `Bearer <token>` (before any network access)
//! - header algorithm is asymmetric (RS*, PS*, ES*, EdDSA)
//! - signature verifies with the `kid` key, or with any key when `kid` is absent
//! - `iss` equals the discovered issuer, `aud` equals the expected audience
//! - `exp` / `nbf` within the configured leeway (default 300 seconds)
//!
//! Callers only learn whether the header was unusable or the token was
//! rejected. The specific cause is logged.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::{TokenClaims, ValidatedIdentity, parse_bearer};
use crate::config::AuthSettings;
use crate::discovery::{DiscoveryClient, DiscoveryError, SigningContext};

/// Asymmetric algorithms accepted in token headers
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Default leeway for `exp` / `nbf`
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Validation failure as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No `Authorization` header, or not `Bearer <token>`
    #[error("Missing or malformed Authorization header")]
    MissingOrMalformedHeader,

    /// Token rejected (signature, issuer, audience, lifetime, algorithm or
    /// tenant discovery failure)
    #[error("Invalid token")]
    InvalidToken,

    /// No expected audience was supplied; a deployment fault, not a bad request
    #[error("Expected audience not configured")]
    Misconfigured,
}

/// Bearer token validator
///
/// Holds the shared [`DiscoveryClient`]; signing contexts are resolved per
/// tenant on first use.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use mailfn_auth::discovery::DiscoveryClient;
/// use mailfn_auth::jwt::TokenValidator;
///
/// # tokio_test::block_on(async {
/// let discovery = Arc::new(DiscoveryClient::new(
///     "https://login.microsoftonline.com",
///     Duration::from_secs(30),
/// )?);
/// let validator = TokenValidator::new(discovery);
///
/// let header = Some("Bearer eyJ0eXAiOiJKV1QiLCJhbGc...");
/// let identity = validator.validate(header, "contoso-tenant-id", "api-client-id").await?;
/// println!("caller: {:?}", identity.subject_key());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TokenValidator {
    discovery: Arc<DiscoveryClient>,
    clock_skew: Duration,
}

impl TokenValidator {
    /// Create a validator with the default clock skew
    pub fn new(discovery: Arc<DiscoveryClient>) -> Self {
        Self {
            discovery,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    /// Create a validator from function settings
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the configured authority is unusable.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, DiscoveryError> {
        let discovery = Arc::new(DiscoveryClient::from_settings(settings)?);
        Ok(Self::new(discovery).with_clock_skew(settings.clock_skew()))
    }

    /// Set the leeway for lifetime checks
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// The discovery client backing this validator
    pub fn discovery(&self) -> &Arc<DiscoveryClient> {
        &self.discovery
    }

    /// Validate an `Authorization` header value
    ///
    /// # Errors
    ///
    /// - [`ValidationError::Misconfigured`] if `expected_audience` is empty,
    ///   before the header is looked at.
    /// - [`ValidationError::MissingOrMalformedHeader`] if the header is absent
    ///   or not a bearer credential; no discovery is attempted.
    /// - [`ValidationError::InvalidToken`] for every other failure.
    pub async fn validate(
        &self,
        authorization: Option<&str>,
        tenant_id: &str,
        expected_audience: &str,
    ) -> Result<ValidatedIdentity, ValidationError> {
        if expected_audience.trim().is_empty() {
            error!(tenant_id, "Expected audience is empty; check api_client_id");
            return Err(ValidationError::Misconfigured);
        }

        let token = authorization
            .and_then(parse_bearer)
            .ok_or(ValidationError::MissingOrMalformedHeader)?;

        let header = decode_header(token).map_err(|e| {
            warn!(error = %e, "Rejected token: undecodable header");
            ValidationError::InvalidToken
        })?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            warn!(algorithm = ?header.alg, "Rejected token: algorithm not allowed");
            return Err(ValidationError::InvalidToken);
        }

        let context = self
            .discovery
            .get_signing_context(tenant_id)
            .await
            .map_err(|e| {
                error!(tenant_id, error = %e, "Rejected token: no signing context");
                ValidationError::InvalidToken
            })?;

        let claims = self.verify(token, &header, &context, expected_audience)?;
        let identity = ValidatedIdentity::new(token, claims);

        if identity.subject_key().is_none() {
            warn!(
                tenant_id,
                "Token has no oid/tid; delegated credentials will not be cached"
            );
        }
        debug!(
            tenant_id,
            subject_key = ?identity.subject_key(),
            algorithm = ?header.alg,
            "Token validated"
        );
        Ok(identity)
    }

    fn verify(
        &self,
        token: &str,
        header: &Header,
        context: &SigningContext,
        expected_audience: &str,
    ) -> Result<TokenClaims, ValidationError> {
        let validation = self.validation_rules(header.alg, &context.issuer, expected_audience);

        let candidates: Vec<&Jwk> = match header.kid.as_deref() {
            Some(kid) => {
                let Some(jwk) = context.find_key(kid) else {
                    warn!(kid, tenant_id = %context.tenant_id, "Rejected token: unknown key id");
                    return Err(ValidationError::InvalidToken);
                };
                vec![jwk]
            }
            None => context.signing_keys.keys.iter().collect(),
        };

        let mut last_error = None;
        for jwk in candidates {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    debug!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable key");
                    continue;
                }
            };

            match decode::<TokenClaims>(token, &key, &validation) {
                Ok(data) => return Ok(data.claims),
                // Wrong key for this token; try the next one
                Err(e) if is_key_mismatch(e.kind()) => last_error = Some(e),
                Err(e) => {
                    warn!(
                        error = %e,
                        issuer = %context.issuer,
                        audience = expected_audience,
                        "Rejected token"
                    );
                    return Err(ValidationError::InvalidToken);
                }
            }
        }

        match last_error {
            Some(e) => warn!(error = %e, "Rejected token: signature not verified by any key"),
            None => warn!("Rejected token: no usable key"),
        }
        Err(ValidationError::InvalidToken)
    }

    fn validation_rules(&self, alg: Algorithm, issuer: &str, audience: &str) -> Validation {
        let mut validation = Validation::new(alg);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = self.clock_skew.as_secs();
        validation
    }
}

fn is_key_mismatch(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
    )
}

//! In-memory credential cache
//!
//! Holds downstream access tokens keyed by who they were acquired for and which
//! scopes they carry. Entries live until the process exits or are overwritten;
//! expired entries are renewed or replaced by the providers, never evicted here.
//!
//! Backed by [`DashMap`], so lookups and inserts for different keys do not
//! contend. Concurrent inserts for the same key are last-write-wins.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use secrecy::SecretString;

/// Tokens this close to expiry are treated as expired
///
/// Capped at half the token's lifetime, so a token issued for five minutes or
/// less is still reused for the first half of its life.
pub const EXPIRY_MARGIN: TimeDelta = TimeDelta::minutes(5);

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Token acquired on behalf of a caller
    Delegated {
        /// `"{oid}.{tid}"` of the caller
        subject_key: String,
        /// Space-joined scopes, in request order
        scopes: String,
    },
    /// App-only token of a client
    Application {
        /// Client (application) ID
        client_id: String,
        /// Space-joined scopes, in request order
        scopes: String,
    },
}

impl CacheKey {
    /// Key for a caller's delegated token
    pub fn delegated<S: AsRef<str>>(subject_key: &str, scopes: &[S]) -> Self {
        Self::Delegated {
            subject_key: subject_key.to_string(),
            scopes: join_scopes(scopes),
        }
    }

    /// Key for an application token
    pub fn application<S: AsRef<str>>(client_id: &str, scopes: &[S]) -> Self {
        Self::Application {
            client_id: client_id.to_string(),
            scopes: join_scopes(scopes),
        }
    }
}

/// Join scopes with single spaces, keeping their order
pub fn join_scopes<S: AsRef<str>>(scopes: &[S]) -> String {
    scopes
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A cached downstream credential
#[derive(Clone)]
pub struct CachedCredential {
    /// Bearer token for the downstream API
    pub access_token: SecretString,
    /// Refresh token, when the grant returned one
    pub refresh_token: Option<SecretString>,
    /// When the credential was acquired
    pub issued_at: DateTime<Utc>,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
}

impl CachedCredential {
    /// Create an entry expiring `expires_in` from now
    pub fn new(
        access_token: SecretString,
        refresh_token: Option<SecretString>,
        expires_in: std::time::Duration,
    ) -> Self {
        let expires_in = TimeDelta::from_std(expires_in).unwrap_or(TimeDelta::MAX);
        let issued_at = Utc::now();
        Self {
            access_token,
            refresh_token,
            issued_at,
            expires_at: issued_at
                .checked_add_signed(expires_in)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Margin applied to this credential: [`EXPIRY_MARGIN`], or half its
    /// lifetime if that is shorter
    pub fn expiry_margin(&self) -> TimeDelta {
        let half_lifetime = (self.expires_at - self.issued_at) / 2;
        EXPIRY_MARGIN.min(half_lifetime.max(TimeDelta::zero()))
    }

    /// Still valid at `now` with the expiry margin applied
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now + self.expiry_margin() < self.expires_at
    }

    /// Still valid now with the expiry margin applied
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    /// Can be renewed without the original grant
    pub fn is_renewable(&self) -> bool {
        self.refresh_token.is_some()
    }
}

impl std::fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCredential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Shared credential store
#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: DashMap<CacheKey, CachedCredential>,
}

impl CredentialCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry, fresh or not
    pub fn get(&self, key: &CacheKey) -> Option<CachedCredential> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Insert or overwrite an entry
    pub fn put(&self, key: CacheKey, credential: CachedCredential) {
        self.entries.insert(key, credential);
    }

    /// Drop an entry
    pub fn remove(&self, key: &CacheKey) -> Option<CachedCredential> {
        self.entries.remove(key).map(|(_, credential)| credential)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

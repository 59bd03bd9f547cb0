//! Token endpoint access
//!
//! - `client` - [`ConfidentialClient`]: client credentials, on-behalf-of and
//!   refresh grants, plus silent acquisition from the credential cache
//! - `http_client` - `reqwest` adapter for the `oauth2` crate

pub mod client;
pub mod http_client;

pub use client::{ConfidentialClient, JWT_BEARER_GRANT_TYPE, TokenRequestError};
pub use http_client::{TokenHttpClient, TokenHttpError};

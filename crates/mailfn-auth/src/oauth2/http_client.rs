//! HTTP client adapter for token endpoint calls
//!
//! Implements the `oauth2` crate's `AsyncHttpClient` on top of the workspace
//! `reqwest` client, so both the library grants (client credentials, refresh)
//! and the hand-built on-behalf-of request go through one client with the same
//! timeout and redirect policy. Redirects are never followed.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use oauth2::AsyncHttpClient;
use oauth2::http::{self, HeaderValue, StatusCode};
use thiserror::Error;

/// Request type used by `oauth2`
pub type HttpRequest = http::Request<Vec<u8>>;
/// Response type used by `oauth2`
pub type HttpResponse = http::Response<Vec<u8>>;

/// Maximum accepted token response body
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Transport errors
#[derive(Debug, Error)]
pub enum TokenHttpError {
    /// Request could not be sent or timed out
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Request or response could not be converted
    #[error("Invalid HTTP message: {0}")]
    InvalidMessage(String),

    /// Response body could not be read or was too large
    #[error("Failed to read response body: {0}")]
    BodyRead(String),
}

/// Token endpoint HTTP client
#[derive(Clone)]
pub struct TokenHttpClient {
    inner: reqwest::Client,
}

impl TokenHttpClient {
    /// Create a client with the given request timeout and no redirects
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self { inner })
    }

    /// Send a request built with the `http` crate types
    ///
    /// # Errors
    ///
    /// Returns [`TokenHttpError`] on transport failure; HTTP error statuses are
    /// returned as responses.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TokenHttpError> {
        let (parts, body) = request.into_parts();

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|_| TokenHttpError::InvalidMessage(format!("method {}", parts.method)))?;

        let mut builder = self.inner.request(method, parts.uri.to_string());
        for (name, value) in &parts.headers {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        let response = builder.body(body).send().await?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| TokenHttpError::InvalidMessage(e.to_string()))?;
        let mut converted = http::Response::builder().status(status);
        for (name, value) in response.headers() {
            let value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| TokenHttpError::InvalidMessage(e.to_string()))?;
            converted = converted.header(name.as_str(), value);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TokenHttpError::BodyRead(e.to_string()))?;
        if body.len() > MAX_RESPONSE_BYTES {
            return Err(TokenHttpError::BodyRead(format!(
                "response exceeds {MAX_RESPONSE_BYTES} bytes"
            )));
        }

        converted
            .body(body.to_vec())
            .map_err(|e| TokenHttpError::InvalidMessage(e.to_string()))
    }
}

impl std::fmt::Debug for TokenHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenHttpClient").finish_non_exhaustive()
    }
}

/// Future returned to `oauth2`
pub type TokenHttpFuture<'c> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TokenHttpError>> + Send + 'c>>;

impl<'c> AsyncHttpClient<'c> for TokenHttpClient {
    type Error = TokenHttpError;
    type Future = TokenHttpFuture<'c>;

    fn call(&'c self, request: HttpRequest) -> Self::Future {
        Box::pin(self.execute(request))
    }
}

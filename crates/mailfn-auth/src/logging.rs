//! Logging initialization
//!
//! Function hosts capture stdout/stderr, so logs go to stderr either as
//! human-readable lines or as JSON records. `RUST_LOG` overrides the
//! configured level.
//!
//! ```rust,no_run
//! use mailfn_auth::LoggingConfig;
//!
//! LoggingConfig::default().init()?;
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io;

use serde::Deserialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or `mailfn_auth=debug`
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON records instead of text lines
    #[serde(default)]
    pub structured: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            structured: false,
        }
    }
}

impl LoggingConfig {
    /// JSON output for log aggregation
    pub fn structured(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            structured: true,
        }
    }

    /// Build the level filter, preferring `RUST_LOG`
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Install the global subscriber
    ///
    /// # Errors
    ///
    /// Returns an error if a global subscriber is already set.
    pub fn init(&self) -> io::Result<()> {
        let subscriber = tracing_subscriber::registry().with(self.filter());

        if self.structured {
            subscriber
                .with(fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        } else {
            subscriber
                .with(fmt::layer().with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        }
    }
}

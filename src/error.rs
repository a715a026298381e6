// src/error.rs

//! Defines the primary error type for the crawler core.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The crate-wide error type. Using `thiserror` gives clean `Display` impls
/// and automatic `From` conversions from the error types of the libraries
/// each component leans on.
#[derive(Error, Debug, Clone)]
pub enum CrawlError {
    /// Filesystem failure while reading or writing a cache file.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// The requested cache entry does not exist on disk.
    #[error("cache entry not present")]
    NotPresent,

    /// The metadata sidecar exists but is not valid JSON, or is missing a
    /// required field.
    #[error("malformed cache metadata: {0}")]
    MalformedMetadata(String),

    /// A transport-level failure: DNS, TLS, connect, or HTTP framing.
    #[error("transport error: {0}")]
    Transport(String),

    /// The URI policy gate rejected the URI outright (as opposed to simply
    /// skipping it).
    #[error("uri policy rejected '{0}'")]
    PolicyRejected(String),

    /// The URI could not be parsed.
    #[error("invalid uri '{0}': {1}")]
    InvalidUri(String, String),

    /// A queue operation exhausted its deadlock-retry budget.
    #[error("queue operation failed after {attempts} attempts: {source_msg}")]
    QueueRetryExhausted { attempts: u32, source_msg: String },

    /// A queue failure that is not retryable and should terminate the
    /// worker loop.
    #[error("fatal queue error: {0}")]
    QueueFatal(String),

    /// The configuration file could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Something the core treats as "should never happen" — an invariant
    /// violation rather than an expected failure mode.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CrawlError {
    fn from(e: std::io::Error) -> Self {
        CrawlError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for CrawlError {
    fn from(e: reqwest::Error) -> Self {
        CrawlError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for CrawlError {
    fn from(e: serde_json::Error) -> Self {
        CrawlError::MalformedMetadata(e.to_string())
    }
}

impl From<url::ParseError> for CrawlError {
    fn from(e: url::ParseError) -> Self {
        CrawlError::InvalidUri(String::new(), e.to_string())
    }
}

impl From<ParseIntError> for CrawlError {
    fn from(e: ParseIntError) -> Self {
        CrawlError::Internal(format!("expected an integer: {e}"))
    }
}

impl From<sqlx::Error> for CrawlError {
    fn from(e: sqlx::Error) -> Self {
        CrawlError::QueueFatal(e.to_string())
    }
}

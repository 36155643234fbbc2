//! Trawl: a polite, resumable, concurrent web crawler
//!
//! The crawl runs as a pipeline of worker pools connected by bounded channels.
//! A URL store deduplicates and tracks every normalized URL, a wait queue orders
//! tickets by priority and eligibility time, a per-host rate limiter spaces
//! fetches, and an HTTP cache pool avoids refetching fresh content. Crawl
//! policy is supplied through the [`crawler::Controller`] trait.

pub mod cache;
pub mod client;
pub mod config;
pub mod crawler;
pub mod output;
pub mod queue;
pub mod ratelimit;
pub mod state;
pub mod store;
pub mod url;

use thiserror::Error;

/// Main error type for Trawl operations
#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Crawler lifecycle error: {0}")]
    Lifecycle(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read task file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in task: {0}")]
    InvalidUrl(String),

    #[error("Invalid URL pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// A response whose status is outside the 2xx range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unexpected response status: {0}")]
pub struct ResponseStatusError(pub u16);

impl ResponseStatusError {
    /// The offending status code
    pub fn code(&self) -> u16 {
        self.0
    }
}

/// Errors raised while reading or decoding a response body
///
/// Body errors are stored by the body reader and replayed on every later read,
/// so the type is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("read response: too many encodings: {0:?}")]
    TooManyEncodings(Vec<String>),

    #[error("read response: unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("read response: content longer than {limit} bytes")]
    TooLong { limit: usize },

    #[error("read response: {0}")]
    Read(String),

    #[error("decode response: {0}")]
    Decode(String),
}

/// Errors produced by a [`client::Client`]
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Status(#[from] ResponseStatusError),

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Returns the HTTP status if this error came from a non-2xx response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(e) => Some(e.code()),
            _ => None,
        }
    }
}

/// Result type alias for Trawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use cache::{CacheControl, CachePool};
pub use client::{Client, HttpClient, Request, Response};
pub use config::Config;
pub use crawler::{Controller, Crawler, Link, NopController, OnceController};
pub use queue::{QueueItem, WaitQueue};
pub use ratelimit::RateLimiter;
pub use state::{UrlRecord, UrlStatus};
pub use store::{MemoryStore, SqliteStore, UrlStore};
pub use url::normalize_url;

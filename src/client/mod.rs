//! Fetching
//!
//! This module defines what it means to perform one fetch:
//! - The `Client` trait every transport implements
//! - `Request` and `Response` as they travel through the pipeline
//! - The response body reader and charset resolution
//! - `HttpClient`, the standard transport with an HTTP cache

mod body;
pub mod charset;
mod http;
mod response;

pub use body::{content_encodings, Body, BodyState};
pub use http::HttpClient;
pub use response::{parse_refresh, Refresh, Response, ResponsePool};

use crate::state::UrlRecord;
use crate::FetchError;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

/// A fetch about to be performed
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,

    /// Extra headers sent with the request
    pub headers: HeaderMap,

    /// Snapshot of the URL record when the request was made
    pub record: UrlRecord,

    cancelled: bool,
}

impl Request {
    /// Creates a GET request for a URL with its record
    pub fn new(url: Url, record: UrlRecord) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            record,
            cancelled: false,
        }
    }

    /// Creates a GET request for a URL that has no record yet
    pub fn get(url: Url) -> Self {
        let record = UrlRecord::new(url.as_str(), 0);
        Self::new(url, record)
    }

    /// Marks the request as cancelled; it will not be sent
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Performs fetches
///
/// Implementations treat only 2xx answers as success; any other status is a
/// `FetchError::Status`.
#[async_trait]
pub trait Client: Send + Sync {
    async fn execute(&self, request: &Request) -> Result<Response, FetchError>;
}

//! Standard HTTP transport
//!
//! `HttpClient` wraps a reqwest client and adds a shared cache pool. GET
//! requests are answered from the pool while the stored response is fresh and
//! revalidated with a conditional request once it is stale.

use crate::cache::{format_http_date, merge_headers, CacheControl, CacheEntry, CachePool};
use crate::client::{Body, Client, Request, Response};
use crate::config::ClientConfig;
use crate::{FetchError, ResponseStatusError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use reqwest::{redirect::Policy, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Codings the body reader can remove
const ACCEPTED_ENCODINGS: &str = "gzip, deflate";

/// HTTP client with an optional cache pool
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    cache: Option<Arc<CachePool>>,
    max_body_bytes: usize,
}

impl HttpClient {
    /// Builds a client from the client configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The client configuration
    ///
    /// # Returns
    ///
    /// * `Ok(HttpClient)` - Successfully built HTTP client
    /// * `Err(reqwest::Error)` - Failed to build client
    ///
    /// # Example
    ///
    /// ```no_run
    /// use trawl::config::ClientConfig;
    /// use trawl::HttpClient;
    ///
    /// let client = HttpClient::new(&ClientConfig::default()).unwrap();
    /// assert!(client.cache().is_some());
    /// ```
    pub fn new(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        // Bodies are decompressed by the body reader so cached entries stay encoded
        let inner = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::limited(config.max_redirects))
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()?;

        let cache = (config.cache_max_bytes > 0)
            .then(|| Arc::new(CachePool::new(config.cache_max_bytes)));

        Ok(Self {
            inner,
            cache,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Replaces the cache pool; `None` disables caching
    pub fn with_cache(mut self, cache: Option<Arc<CachePool>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> Option<&Arc<CachePool>> {
        self.cache.as_ref()
    }

    async fn send(
        &self,
        request: &Request,
        mut headers: HeaderMap,
    ) -> Result<reqwest::Response, FetchError> {
        headers
            .entry(ACCEPT_ENCODING)
            .or_insert(HeaderValue::from_static(ACCEPTED_ENCODINGS));

        let response = self
            .inner
            .request(request.method.clone(), request.url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: request.url.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            "{} {} -> {}",
            request.method,
            request.url,
            response.status().as_u16()
        );
        Ok(response)
    }

    /// Wraps a successful network response, capturing its body for the pool
    fn network_response(
        &self,
        request: &Request,
        response: reqwest::Response,
        timestamp: DateTime<Utc>,
    ) -> Response {
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let control = CacheControl::parse(status, &headers, timestamp);

        let mut body = if request.method == Method::HEAD {
            Body::empty()
        } else {
            Body::network(response, self.max_body_bytes)
        };

        if request.method == Method::GET {
            if let Some(pool) = &self.cache {
                match &control {
                    Some(control) => body.capture_into(
                        Arc::clone(pool),
                        CacheEntry {
                            url: request.url.to_string(),
                            final_url: final_url.to_string(),
                            status,
                            headers: headers.clone(),
                            body: Vec::new(),
                            control: control.clone(),
                        },
                    ),
                    None => {
                        pool.remove(request.url.as_str());
                    }
                }
            }
        }

        let mut resp = Response::new(request, final_url, status, headers, body, timestamp);
        resp.cache_control = control;
        resp
    }

    /// Replays a stored response
    fn cached_response(
        &self,
        request: &Request,
        entry: CacheEntry,
        control: Option<CacheControl>,
        timestamp: DateTime<Utc>,
    ) -> Response {
        let url = Url::parse(&entry.final_url).unwrap_or_else(|_| request.url.clone());
        let body = Body::memory(entry.body, &entry.headers, self.max_body_bytes);
        let mut resp = Response::new(request, url, entry.status, entry.headers, body, timestamp);
        resp.cache_control = control;
        resp.from_cache = true;
        resp
    }

    /// Confirms a stale entry with a conditional GET
    async fn revalidate(
        &self,
        request: &Request,
        pool: &CachePool,
        entry: CacheEntry,
    ) -> Result<Response, FetchError> {
        let mut headers = request.headers.clone();
        if let Some(etag) = entry.control.etag.as_deref() {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }
        let since = entry.control.last_modified.unwrap_or(entry.control.date);
        if let Ok(value) = HeaderValue::from_str(&format_http_date(since)) {
            headers.insert(IF_MODIFIED_SINCE, value);
        }

        let response = self.send(request, headers).await?;
        let timestamp = Utc::now();
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            let mut merged = entry.headers.clone();
            merge_headers(&mut merged, response.headers());
            let control = CacheControl::parse(entry.status, &merged, timestamp);

            if pool
                .update(request.url.as_str(), control.clone(), response.headers())
                .is_none()
            {
                debug!("{} is no longer cacheable", request.url);
            }

            let entry = CacheEntry {
                headers: merged,
                ..entry
            };
            return Ok(self.cached_response(request, entry, control, timestamp));
        }

        if status.is_success() {
            return Ok(self.network_response(request, response, timestamp));
        }
        Err(ResponseStatusError(status.as_u16()).into())
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn execute(&self, request: &Request) -> Result<Response, FetchError> {
        if request.is_cancelled() {
            return Err(FetchError::InvalidRequest(format!(
                "request for {} was cancelled",
                request.url
            )));
        }

        if request.method == Method::GET {
            if let Some(pool) = &self.cache {
                if let Some(entry) = pool.get(request.url.as_str()) {
                    let now = Utc::now();
                    if !entry.control.need_validate_at(now) {
                        debug!("Serving {} from cache", request.url);
                        let control = Some(entry.control.clone());
                        return Ok(self.cached_response(request, entry, control, now));
                    }
                    return self.revalidate(request, pool, entry).await;
                }
            }
        }

        let response = self.send(request, request.headers.clone()).await?;
        let timestamp = Utc::now();
        if !response.status().is_success() {
            return Err(ResponseStatusError(response.status().as_u16()).into());
        }
        Ok(self.network_response(request, response, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client() {
        let client = HttpClient::new(&ClientConfig::default()).unwrap();
        assert_eq!(
            client.cache().map(|c| c.max_bytes()),
            Some(ClientConfig::default().cache_max_bytes)
        );
    }

    #[test]
    fn test_cache_disabled_by_zero_budget() {
        let config = ClientConfig {
            cache_max_bytes: 0,
            ..ClientConfig::default()
        };
        let client = HttpClient::new(&config).unwrap();
        assert!(client.cache().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_request_is_not_sent() {
        let client = HttpClient::new(&ClientConfig::default()).unwrap();
        let mut request = Request::get(Url::parse("http://127.0.0.1:9/").unwrap());
        request.cancel();
        assert!(matches!(
            client.execute(&request).await,
            Err(FetchError::InvalidRequest(_))
        ));
    }
}

//! HTTP caching
//!
//! This module implements the parts of HTTP caching a crawler needs:
//! - Cache-Control, Expires and Age interpretation
//! - Freshness and revalidation checks
//! - A size-bounded in-memory pool of responses

mod control;
mod pool;

pub use control::{format_http_date, header_time, parse_http_date, CacheControl, CacheType};
pub use pool::{merge_headers, CacheEntry, CachePool};

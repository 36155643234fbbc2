//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `UrlStatus`: where a URL currently is in the pipeline
//! - `UrlRecord`: the per-URL metadata kept by the URL store

mod record;
mod url_status;

pub use record::UrlRecord;
pub use url_status::UrlStatus;

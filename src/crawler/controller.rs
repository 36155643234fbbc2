//! Crawl policy
//!
//! A [`Controller`] decides what the crawler does with each URL: how requests
//! are prepared, which links a response yields, which links are accepted, when
//! a URL is (re)visited and how far apart fetches to one host are spaced.

use crate::client::{Request, Response};
use crate::crawler::extract::LinkExtractor;
use crate::state::UrlRecord;
use chrono::{DateTime, Utc};
use std::time::Duration;
use url::Url;

/// A URL discovered while handling a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: Url,

    /// Depth the URL gets if it becomes a new record (source depth + 1)
    pub depth: u32,
}

impl Link {
    pub fn new(url: Url) -> Self {
        Self { url, depth: 0 }
    }
}

/// Scheduling decision for a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Visit with `score` priority, no earlier than `at` (`None` means now)
    Next {
        score: i32,
        at: Option<DateTime<Utc>>,
    },

    /// Never schedule the URL again
    Done,
}

impl Visit {
    /// Visit as soon as possible
    pub fn now(score: i32) -> Self {
        Self::Next { score, at: None }
    }

    /// Visit no earlier than `at`
    pub fn at(score: i32, at: DateTime<Utc>) -> Self {
        Self::Next {
            score,
            at: Some(at),
        }
    }
}

/// User-supplied crawl policy
///
/// Callbacks run on the pipeline's worker tasks and must not block for long.
pub trait Controller: Send + Sync {
    /// Last chance to change a request, or cancel it, before it is sent
    fn prepare(&self, _request: &mut Request) {}

    /// Processes a decoded response and returns the links found in it
    fn handle(&self, _response: &Response) -> Vec<Link> {
        Vec::new()
    }

    /// Decides whether a discovered link is crawled
    fn accept(&self, _link: &Link) -> bool {
        true
    }

    /// Decides whether, when and how urgently a URL is (re)visited
    fn schedule(&self, record: &UrlRecord) -> Visit;

    /// Minimum spacing between fetches to `host`; zero uses the crawler default
    fn interval(&self, _host: &str) -> Duration {
        Duration::ZERO
    }
}

/// Visits every URL it is given once and follows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NopController;

impl Controller for NopController {
    fn schedule(&self, record: &UrlRecord) -> Visit {
        visit_once(record)
    }
}

/// Visits every URL once and follows the links of HTML pages
#[derive(Debug, Clone, Copy, Default)]
pub struct OnceController {
    extractor: LinkExtractor,
}

impl OnceController {
    pub fn new(extractor: LinkExtractor) -> Self {
        Self { extractor }
    }
}

impl Controller for OnceController {
    fn handle(&self, response: &Response) -> Vec<Link> {
        extract_links(&self.extractor, response)
    }

    fn schedule(&self, record: &UrlRecord) -> Visit {
        visit_once(record)
    }
}

fn visit_once(record: &UrlRecord) -> Visit {
    if record.visit_count > 0 {
        Visit::Done
    } else {
        Visit::now(0)
    }
}

/// Runs `extractor` over an HTML response; other responses yield nothing
pub(crate) fn extract_links(extractor: &LinkExtractor, response: &Response) -> Vec<Link> {
    if !response.is_html() || !response.is_decoded() {
        return Vec::new();
    }
    extractor
        .extract(&response.text(), &response.url)
        .into_iter()
        .map(Link::new)
        .collect()
}

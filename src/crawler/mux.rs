//! Pattern-routed controller
//!
//! `Mux` assembles a [`Controller`] from URL patterns. Each concern (filter,
//! follow, score, visit count, revisit duration, host interval, preparers and
//! handlers) has its own [`Router`]; routes are evaluated first-match in the
//! order they were added.

use crate::client::{Request, Response};
use crate::config::TaskConfig;
use crate::crawler::controller::{extract_links, Controller, Link, Visit};
use crate::crawler::extract::LinkExtractor;
use crate::state::UrlRecord;
use crate::url::Router;
use crate::ConfigResult;
use std::fmt;
use std::time::Duration;

type Preparer = Box<dyn Fn(&mut Request) + Send + Sync>;
type Handler = Box<dyn Fn(&Response) + Send + Sync>;

/// A controller configured with URL patterns
///
/// Links are rejected unless an allow pattern matches them first; URLs are
/// visited once unless a visit count says otherwise.
///
/// # Example
///
/// ```
/// use trawl::crawler::{Mux, Link};
/// use trawl::Controller;
/// use url::Url;
///
/// let mut mux = Mux::new();
/// mux.disallow("*/private/*").unwrap();
/// mux.allow("https://example.com/*").unwrap();
///
/// let link = |s: &str| Link::new(Url::parse(s).unwrap());
/// assert!(mux.accept(&link("https://example.com/docs")));
/// assert!(!mux.accept(&link("https://example.com/private/x")));
/// assert!(!mux.accept(&link("https://other.com/")));
/// ```
pub struct Mux {
    filter: Router<bool>,
    follow: Router<bool>,
    score: Router<i32>,
    times: Router<u32>,
    duration: Router<Duration>,
    interval: Router<Duration>,
    preparers: Router<Preparer>,
    handlers: Router<Handler>,
    max_depth: Option<u32>,
    extractor: LinkExtractor,
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mux")
            .field("filter", &self.filter)
            .field("max_depth", &self.max_depth)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl Mux {
    pub fn new() -> Self {
        Self {
            filter: Router::new(),
            follow: Router::new(),
            score: Router::new(),
            times: Router::new(),
            duration: Router::new(),
            interval: Router::new(),
            preparers: Router::new(),
            handlers: Router::new(),
            max_depth: None,
            extractor: LinkExtractor::hrefs(),
        }
    }

    /// Builds the controller a task file describes
    ///
    /// Disallow patterns are checked before allow patterns. An empty allow list
    /// accepts every link that is not disallowed. A positive `revisit-secs`
    /// revisits every URL at that period, indefinitely.
    ///
    /// # Arguments
    ///
    /// * `task` - The task section of the configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Mux)` - The configured controller
    /// * `Err(ConfigError)` - A pattern did not parse
    pub fn from_task(task: &TaskConfig) -> ConfigResult<Self> {
        let mut mux = Self::new();
        for pattern in &task.disallow {
            mux.disallow(pattern)?;
        }
        if task.allow.is_empty() {
            mux.allow("*")?;
        }
        for pattern in &task.allow {
            mux.allow(pattern)?;
        }
        if task.max_depth > 0 {
            mux.set_max_depth(task.max_depth);
        }
        if task.revisit_secs > 0 {
            mux.set_times("*", u32::MAX)?;
            mux.set_duration("*", Duration::from_secs(task.revisit_secs))?;
        }
        Ok(mux)
    }

    /// Accepts links matching `pattern`
    pub fn allow(&mut self, pattern: &str) -> ConfigResult<()> {
        self.filter.add_pattern(pattern, true)
    }

    /// Rejects links matching `pattern`
    pub fn disallow(&mut self, pattern: &str) -> ConfigResult<()> {
        self.filter.add_pattern(pattern, false)
    }

    /// Follows links on pages matching `pattern` (the default)
    pub fn follow(&mut self, pattern: &str) -> ConfigResult<()> {
        self.follow.add_pattern(pattern, true)
    }

    /// Does not follow links on pages matching `pattern`
    pub fn no_follow(&mut self, pattern: &str) -> ConfigResult<()> {
        self.follow.add_pattern(pattern, false)
    }

    pub fn set_score(&mut self, pattern: &str, score: i32) -> ConfigResult<()> {
        self.score.add_pattern(pattern, score)
    }

    /// Maximum number of visits of URLs matching `pattern`
    pub fn set_times(&mut self, pattern: &str, times: u32) -> ConfigResult<()> {
        self.times.add_pattern(pattern, times)
    }

    /// Time between two visits of URLs matching `pattern`
    pub fn set_duration(&mut self, pattern: &str, duration: Duration) -> ConfigResult<()> {
        self.duration.add_pattern(pattern, duration)
    }

    /// Spacing between fetches to hosts matching `pattern`
    ///
    /// The pattern is matched against the host key (`host[:port]`), not a URL.
    pub fn set_interval(&mut self, pattern: &str, interval: Duration) -> ConfigResult<()> {
        self.interval.add_pattern(pattern, interval)
    }

    /// Links deeper than `depth` are rejected
    pub fn set_max_depth(&mut self, depth: u32) {
        self.max_depth = Some(depth);
    }

    pub fn set_extractor(&mut self, extractor: LinkExtractor) {
        self.extractor = extractor;
    }

    /// Registers a function that adjusts requests for URLs matching `pattern`
    pub fn add_preparer<F>(&mut self, pattern: &str, f: F) -> ConfigResult<()>
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        self.preparers.add_pattern(pattern, Box::new(f))
    }

    /// Registers a function that processes responses whose URL matches `pattern`
    pub fn add_handler<F>(&mut self, pattern: &str, f: F) -> ConfigResult<()>
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.handlers.add_pattern(pattern, Box::new(f))
    }
}

impl Controller for Mux {
    fn prepare(&self, request: &mut Request) {
        if let Some(prepare) = self.preparers.route(request.url.as_str()) {
            prepare(request);
        }
    }

    fn handle(&self, response: &Response) -> Vec<Link> {
        let url = response.url.as_str();
        if let Some(handle) = self.handlers.route(url) {
            handle(response);
        }
        if self.follow.route(url).copied().unwrap_or(true) {
            extract_links(&self.extractor, response)
        } else {
            Vec::new()
        }
    }

    fn accept(&self, link: &Link) -> bool {
        if self.max_depth.is_some_and(|max| link.depth > max) {
            return false;
        }
        self.filter
            .route(link.url.as_str())
            .copied()
            .unwrap_or(false)
    }

    fn schedule(&self, record: &UrlRecord) -> Visit {
        let url = record.loc.as_str();
        let times = self.times.route(url).copied().unwrap_or(1);
        if record.visit_count >= times {
            return Visit::Done;
        }

        let score = self.score.route(url).copied().unwrap_or(0);
        let at = self
            .duration
            .route(url)
            .zip(record.last_visit)
            .and_then(|(d, last)| {
                chrono::Duration::from_std(*d)
                    .ok()
                    .and_then(|d| last.checked_add_signed(d))
            });
        Visit::Next { score, at }
    }

    fn interval(&self, host: &str) -> Duration {
        self.interval.route(host).copied().unwrap_or(Duration::ZERO)
    }
}

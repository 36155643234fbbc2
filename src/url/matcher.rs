//! URL matchers and first-match routing
//!
//! Patterns are written as strings:
//!
//! - `= <url>` matches exactly one URL
//! - `~ <regex>` matches URLs the regular expression finds a match in
//! - anything else is a glob where `*` matches any run of characters
//!
//! A [`Router`] evaluates its routes in insertion order and returns the value
//! of the first matcher that accepts the URL.

use crate::ConfigError;
use regex::Regex;
use std::fmt;

/// Prefix marking an exact-match pattern
pub const EXACT_PREFIX: &str = "= ";

/// Prefix marking a regular-expression pattern
pub const REGEX_PREFIX: &str = "~ ";

/// A predicate over URL strings
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Returns true if `url` is accepted by this matcher
    fn matches(&self, url: &str) -> bool;
}

/// Matches one URL exactly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactMatcher(String);

impl ExactMatcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }
}

impl Matcher for ExactMatcher {
    fn matches(&self, url: &str) -> bool {
        self.0 == url
    }
}

/// Matches URLs against a glob where `*` stands for any run of characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobMatcher(String);

impl GlobMatcher {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }
}

impl Matcher for GlobMatcher {
    fn matches(&self, url: &str) -> bool {
        matches_glob(&self.0, url)
    }
}

/// Matches URLs with a regular expression
#[derive(Debug, Clone)]
pub struct RegexMatcher(Regex);

impl RegexMatcher {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))
    }
}

impl Matcher for RegexMatcher {
    fn matches(&self, url: &str) -> bool {
        self.0.is_match(url)
    }
}

/// Builds the matcher a pattern string describes
///
/// # Examples
///
/// ```
/// use trawl::url::{parse_pattern, Matcher};
///
/// let exact = parse_pattern("= http://example.org").unwrap();
/// assert!(exact.matches("http://example.org"));
/// assert!(!exact.matches("http://example.org/"));
///
/// let glob = parse_pattern("http://example.org/*").unwrap();
/// assert!(glob.matches("http://example.org/a/b"));
///
/// let regex = parse_pattern("~ ^http://example\\.org/\\d+$").unwrap();
/// assert!(regex.matches("http://example.org/42"));
/// ```
pub fn parse_pattern(pattern: &str) -> Result<Box<dyn Matcher>, ConfigError> {
    if let Some(exact) = pattern.strip_prefix(EXACT_PREFIX) {
        return Ok(Box::new(ExactMatcher::new(exact)));
    }
    if let Some(re) = pattern.strip_prefix(REGEX_PREFIX) {
        return Ok(Box::new(RegexMatcher::new(re)?));
    }
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "URL pattern cannot be empty".to_string(),
        ));
    }
    Ok(Box::new(GlobMatcher::new(pattern)))
}

/// Checks if a candidate matches a glob pattern
///
/// `*` matches any (possibly empty) run of characters, every other character
/// matches itself.
pub fn matches_glob(pattern: &str, candidate: &str) -> bool {
    let p = pattern.as_bytes();
    let c = candidate.as_bytes();
    let (mut pi, mut ci) = (0, 0);
    // Position of the last star seen and the candidate index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while ci < c.len() {
        if pi < p.len() && p[pi] == b'*' {
            backtrack = Some((pi, ci));
            pi += 1;
        } else if pi < p.len() && p[pi] == c[ci] {
            pi += 1;
            ci += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ci = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&b| b == b'*')
}

/// An ordered list of (matcher, value) routes evaluated first-match
pub struct Router<V> {
    routes: Vec<(Box<dyn Matcher>, V)>,
}

impl<V> Default for Router<V> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<V> fmt::Debug for Router<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl<V> Router<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route with an already built matcher
    pub fn add(&mut self, matcher: Box<dyn Matcher>, value: V) {
        self.routes.push((matcher, value));
    }

    /// Appends a route for a pattern string
    pub fn add_pattern(&mut self, pattern: &str, value: V) -> Result<(), ConfigError> {
        let matcher = parse_pattern(pattern)?;
        self.add(matcher, value);
        Ok(())
    }

    /// Returns the value of the first route whose matcher accepts `url`
    pub fn route(&self, url: &str) -> Option<&V> {
        self.routes
            .iter()
            .find(|(matcher, _)| matcher.matches(url))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

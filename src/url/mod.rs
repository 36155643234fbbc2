//! URL handling module for Trawl
//!
//! This module provides URL normalization, host keys for rate limiting, and
//! pattern matchers with first-match routing.

mod host;
mod matcher;
mod normalize;

pub use host::host_key;
pub use matcher::{
    matches_glob, parse_pattern, ExactMatcher, GlobMatcher, Matcher, RegexMatcher, Router,
    EXACT_PREFIX, REGEX_PREFIX,
};
pub use normalize::{normalize, normalize_ref, normalize_url};

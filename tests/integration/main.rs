//! Integration tests for Trawl
//!
//! Every test runs against a wiremock server on localhost.

mod client_tests;
mod crawl_tests;

//! Output module for crawl reports
//!
//! This module turns the counters of a URL store into the statistics report
//! printed by the command-line driver.

pub mod stats;

pub use stats::{format_statistics, load_statistics, print_statistics, CrawlStatistics};

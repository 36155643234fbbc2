//! Configuration module for Trawl
//!
//! This module handles loading, parsing, and validating TOML task files.
//!
//! # Example
//!
//! ```no_run
//! use trawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("task.toml")).unwrap();
//! println!("Fetching with {} workers", config.crawler.fetcher_workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{ClientConfig, Config, CrawlerConfig, StoreBackend, StoreConfig, TaskConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;

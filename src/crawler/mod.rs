//! Crawler module: the crawl pipeline and its policy hooks
//!
//! This module contains:
//! - The `Controller` trait and the built-in controllers
//! - Link extraction from HTML
//! - The pipeline stages (maker, fetcher, handler, filter, scheduler)
//! - The `Crawler` orchestrator that wires the stages together

mod controller;
#[allow(clippy::module_inception)]
mod crawler;
mod extract;
mod fetcher;
mod filter;
mod handler;
mod maker;
mod mux;
mod scheduler;
mod stage;

pub use controller::{Controller, Link, NopController, OnceController, Visit};
pub use crawler::Crawler;
pub use extract::LinkExtractor;
pub use mux::Mux;

//! Trawl main entry point
//!
//! This is the command-line interface for the Trawl web crawler.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use trawl::client::{Client, HttpClient};
use trawl::config::{load_config_with_hash, Config, StoreBackend};
use trawl::crawler::{Crawler, Mux};
use trawl::output::{load_statistics, print_statistics};
use trawl::store::{open_store, SqliteStore};

/// Trawl: a polite, resumable web crawler
///
/// Trawl crawls the seeds of a task file, follows the links its allow and
/// disallow patterns accept, spaces requests per host and keeps its progress
/// in a URL store so an interrupted crawl can be resumed.
#[derive(Parser, Debug)]
#[command(name = "trawl")]
#[command(version)]
#[command(about = "A polite, resumable web crawler", long_about = None)]
struct Cli {
    /// Path to TOML task file
    #[arg(value_name = "TASK")]
    task: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the task and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the SQLite store and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading task from: {}", cli.task.display());
    let (config, hash) = load_config_with_hash(&cli.task)
        .with_context(|| format!("failed to load task {}", cli.task.display()))?;
    tracing::info!("Task loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, &hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("trawl=info,warn"),
            1 => EnvFilter::new("trawl=debug,info"),
            2 => EnvFilter::new("trawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the validated plan
fn handle_dry_run(config: &Config) {
    println!("=== Trawl Dry Run ===\n");

    let crawler = &config.crawler;
    println!("Pipeline:");
    println!(
        "  Workers: {} makers, {} fetchers, {} handlers, {} filters, {} schedulers",
        crawler.maker_workers,
        crawler.fetcher_workers,
        crawler.handler_workers,
        crawler.filter_workers,
        crawler.scheduler_workers
    );
    println!("  Channel capacity: {}", crawler.channel_capacity);
    println!("  Queue capacity: {}", crawler.queue_capacity);
    println!(
        "  Host interval: {}ms (burst {})",
        crawler.default_interval_ms, crawler.default_burst
    );
    println!(
        "  Retries: {} (every {}ms)",
        crawler.max_retries, crawler.retry_delay_ms
    );

    println!("\nClient:");
    println!("  User agent: {}", config.client.user_agent);
    println!("  Timeout: {}s", config.client.timeout_secs);
    println!("  Cache: {} bytes", config.client.cache_max_bytes);

    println!("\nStore:");
    match config.store.backend {
        StoreBackend::Memory => println!("  In memory"),
        StoreBackend::Sqlite => println!("  SQLite at {}", config.store.path),
    }

    let task = &config.task;
    println!("\nSeeds ({}):", task.seeds.len());
    for seed in &task.seeds {
        println!("  - {}", seed);
    }
    println!("\nAllow ({}):", task.allow.len());
    for pattern in &task.allow {
        println!("  - {}", pattern);
    }
    println!("\nDisallow ({}):", task.disallow.len());
    for pattern in &task.disallow {
        println!("  - {}", pattern);
    }
    match task.max_depth {
        0 => println!("\nMax depth: unlimited"),
        depth => println!("\nMax depth: {}", depth),
    }
    match task.revisit_secs {
        0 => println!("Revisit: never"),
        secs => println!("Revisit: every {}s", secs),
    }

    println!("\n✓ Task is valid");
    println!("✓ Would start crawling with {} seed URLs", task.seeds.len());
}

/// Handles the --stats mode: shows statistics from the store
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    if config.store.backend != StoreBackend::Sqlite {
        bail!("--stats needs a sqlite store; the in-memory store keeps nothing");
    }

    println!("Database: {}\n", config.store.path);
    let store = SqliteStore::new(Path::new(&config.store.path))?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, hash: &str) -> anyhow::Result<()> {
    if config.task.seeds.is_empty() {
        bail!("the task has no seeds to crawl");
    }

    let controller = Arc::new(Mux::from_task(&config.task)?);
    let store = open_store(&config.store, Some(hash))?;
    let client: Arc<dyn Client> = Arc::new(HttpClient::new(&config.client)?);
    let seeds = config.task.seeds.clone();

    let crawler = Arc::new(Crawler::new(config, controller, Arc::clone(&store), client));
    let added = crawler.add_seeds(&seeds).await?;
    tracing::info!("{} new seeds, {} already known", added, seeds.len() - added);

    // Ctrl-C stops the crawl; the store keeps what is left for the next run
    let interrupt = {
        let crawler = Arc::clone(&crawler);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping crawl");
                crawler.stop();
            }
        })
    };

    let result = crawler.crawl().await;
    interrupt.abort();
    match result {
        Ok(()) => tracing::info!("Crawl completed"),
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            return Err(e.into());
        }
    }

    print_statistics(&load_statistics(store.as_ref())?);
    Ok(())
}

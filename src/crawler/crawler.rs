//! Crawl orchestration
//!
//! The `Crawler` wires the stages into a loop:
//!
//! ```text
//! scheduler -> wait queue -> maker -> fetcher -> handler -> filter -> scheduler
//! ```
//!
//! and owns the lifecycle: seeding, resuming pending URLs from the store,
//! waiting for the crawl to drain and stopping it.

use crate::client::{Client, HttpClient, ResponsePool};
use crate::config::Config;
use crate::crawler::controller::Controller;
use crate::crawler::stage::{self, forward, SchedMsg, Shared, SharedReceiver};
use crate::crawler::{fetcher, filter, handler, maker, scheduler};
use crate::queue::WaitQueue;
use crate::ratelimit::RateLimiter;
use crate::state::UrlRecord;
use crate::store::{open_store, StoreStats, UrlStore};
use crate::url::normalize_url;
use crate::{Result, TrawlError};
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A polite, resumable, concurrent crawler
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use trawl::{Config, Crawler, OnceController};
///
/// # async fn run() -> trawl::Result<()> {
/// let crawler = Crawler::with_config(Config::default(), Arc::new(OnceController::default()))?;
/// crawler.add_seeds(["https://example.com/"]).await?;
/// crawler.crawl().await?;
/// println!("{:?}", crawler.stats()?);
/// # Ok(())
/// # }
/// ```
pub struct Crawler {
    config: Config,
    shared: Arc<Shared>,

    /// Scheduler input; `None` until started and after shutdown
    sched: Mutex<Option<mpsc::Sender<SchedMsg>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl Crawler {
    /// Creates a crawler from its collaborators
    ///
    /// # Arguments
    ///
    /// * `config` - Crawl configuration
    /// * `controller` - Crawl policy
    /// * `store` - URL store, possibly holding an interrupted crawl
    /// * `client` - Transport performing the fetches
    pub fn new(
        config: Config,
        controller: Arc<dyn Controller>,
        store: Arc<dyn UrlStore>,
        client: Arc<dyn Client>,
    ) -> Self {
        let limiter = {
            let controller = Arc::clone(&controller);
            let default_interval = config.crawler.default_interval();
            let burst = config.crawler.default_burst;
            RateLimiter::new(move |host| {
                let interval = controller.interval(host);
                if interval.is_zero() {
                    (default_interval, burst)
                } else {
                    (interval, burst)
                }
            })
        };

        let shared = Shared {
            config: config.crawler.clone(),
            default_charset: config.client.default_charset.clone(),
            controller,
            store,
            client,
            queue: Arc::new(WaitQueue::new(config.crawler.queue_capacity)),
            limiter,
            responses: ResponsePool::new(config.crawler.handler_workers * 2),
            quit: watch::channel(false).0,
            finished: watch::channel(false).0,
            abandoned: DashSet::new(),
        };

        Self {
            config,
            shared: Arc::new(shared),
            sched: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a crawler with the configured store and an `HttpClient`
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - Ready to be seeded and started
    /// * `Err(TrawlError)` - The store or the HTTP client could not be created
    pub fn with_config(config: Config, controller: Arc<dyn Controller>) -> Result<Self> {
        let store = open_store(&config.store, None)?;
        let client: Arc<dyn Client> = Arc::new(HttpClient::new(&config.client)?);
        Ok(Self::new(config, controller, store, client))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn UrlStore> {
        &self.shared.store
    }

    fn sched(&self) -> MutexGuard<'_, Option<mpsc::Sender<SchedMsg>>> {
        self.sched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds seed URLs at depth 0
    ///
    /// Seeds are normalized; seeds already known to the store are ignored.
    /// Seeds added before `start` are scheduled when the crawl starts.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of new records created
    /// * `Err(TrawlError)` - A seed is not a valid URL or the store failed
    pub async fn add_seeds<I, S>(&self, seeds: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for seed in seeds {
            let url = normalize_url(seed.as_ref())?;
            let loc = url.to_string();

            let tx = {
                let sched = self.sched();
                if !self.shared.store.put_if_absent(UrlRecord::new(loc.as_str(), 0))? {
                    continue;
                }
                sched.clone()
            };
            added += 1;
            info!("Added seed {}", loc);

            if let Some(tx) = tx {
                let mut quit = self.shared.quit.subscribe();
                if !forward(&tx, SchedMsg::New(loc), &mut quit).await {
                    return Err(TrawlError::Lifecycle("crawler is stopped".to_string()));
                }
            }
        }
        Ok(added)
    }

    /// Spawns every stage and schedules the pending URLs of the store
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The crawl is running
    /// * `Err(TrawlError)` - Already started, or the store failed
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(TrawlError::Lifecycle("crawler already started".to_string()));
        }

        let cfg = &self.config.crawler;
        let cap = cfg.channel_capacity;
        let (req_tx, req_rx) = mpsc::channel(cap);
        let (resp_tx, resp_rx) = mpsc::channel(cap);
        let (batch_tx, batch_rx) = mpsc::channel(cap);
        let (sched_tx, sched_rx) = mpsc::channel(cap);

        let req_rx: SharedReceiver<_> = Arc::new(tokio::sync::Mutex::new(req_rx));
        let resp_rx: SharedReceiver<_> = Arc::new(tokio::sync::Mutex::new(resp_rx));
        let batch_rx: SharedReceiver<_> = Arc::new(tokio::sync::Mutex::new(batch_rx));
        let sched_rx: SharedReceiver<_> = Arc::new(tokio::sync::Mutex::new(sched_rx));

        let shared = &self.shared;
        let mut handles = Vec::new();
        handles.extend(stage::spawn_workers("maker", cfg.maker_workers, |_| {
            maker::run(Arc::clone(shared), req_tx.clone(), sched_tx.clone())
        }));
        handles.extend(stage::spawn_workers("fetcher", cfg.fetcher_workers, |_| {
            fetcher::run(
                Arc::clone(shared),
                Arc::clone(&req_rx),
                resp_tx.clone(),
                sched_tx.clone(),
            )
        }));
        handles.extend(stage::spawn_workers("handler", cfg.handler_workers, |_| {
            handler::run(Arc::clone(shared), Arc::clone(&resp_rx), batch_tx.clone())
        }));
        handles.extend(stage::spawn_workers("filter", cfg.filter_workers, |_| {
            filter::run(Arc::clone(shared), Arc::clone(&batch_rx), sched_tx.clone())
        }));
        handles.extend(stage::spawn_workers("scheduler", cfg.scheduler_workers, |_| {
            scheduler::run(Arc::clone(shared), Arc::clone(&sched_rx))
        }));

        let pending = {
            let mut sched = self.sched();
            let pending = self.shared.store.pending()?;
            *sched = Some(sched_tx.clone());
            pending
        };
        info!(
            "Crawl started with {} pending URLs ({} fetchers)",
            pending.len(),
            cfg.fetcher_workers
        );

        // Feeding may block on a full channel, so it runs beside the stages
        let feeder = {
            let mut quit = self.shared.quit.subscribe();
            tokio::spawn(async move {
                for loc in pending {
                    if !forward(&sched_tx, SchedMsg::New(loc), &mut quit).await {
                        return;
                    }
                }
            })
        };
        handles.push(feeder);

        self.handles().extend(handles);
        Ok(())
    }

    /// Waits until every known URL is done or `stop` is called, then shuts
    /// the pipeline down and closes the store
    pub async fn wait(&self) -> Result<()> {
        let finished = self.wait_finished().await;
        self.shutdown().await?;
        finished
    }

    async fn wait_finished(&self) -> Result<()> {
        let mut quit = self.shared.quit.subscribe();
        let mut finished = self.shared.finished.subscribe();
        loop {
            // The finished flag only wakes us up; the store has the last word
            finished.borrow_and_update();
            if *quit.borrow_and_update() || self.shared.is_finished()? {
                return Ok(());
            }
            tokio::select! {
                _ = quit.changed() => {}
                _ = finished.changed() => {}
            }
        }
    }

    /// Signals every stage to stop; `wait` then returns promptly
    pub fn stop(&self) {
        info!("Stopping crawl");
        self.shared.quit.send_replace(true);
        self.shared.queue.close();
    }

    /// Starts the crawl and waits for it to end
    pub async fn crawl(&self) -> Result<()> {
        self.start()?;
        self.wait().await
    }

    /// Current URL counts of the store
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.shared.store.stats()?)
    }

    async fn shutdown(&self) -> Result<()> {
        self.shared.quit.send_replace(true);
        self.shared.queue.close();
        self.sched().take();

        let handles = std::mem::take(&mut *self.handles());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {}", e);
            }
        }

        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let stats = self.shared.store.stats()?;
        info!(
            "Crawl ended: {} known, {} fetched, {} with errors, {} done",
            stats.known, stats.fetched, stats.errors, stats.done
        );
        if !self.shared.abandoned.is_empty() {
            warn!(
                "{} URLs were abandoned after store failures",
                self.shared.abandoned.len()
            );
        }
        self.shared.store.close()?;
        Ok(())
    }
}

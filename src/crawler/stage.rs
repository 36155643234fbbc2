//! Plumbing shared by the pipeline stages
//!
//! Every stage is a pool of tasks draining one bounded channel. A broadcast
//! quit signal is observed at every point where a worker can block.

use crate::client::{Client, ResponsePool};
use crate::config::CrawlerConfig;
use crate::crawler::controller::{Controller, Link};
use crate::queue::WaitQueue;
use crate::ratelimit::RateLimiter;
use crate::store::{StoreError, StoreResult, UrlStore};
use dashmap::DashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Receiver shared by the workers of one stage
pub(crate) type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Work for the scheduler stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SchedMsg {
    /// A record was just created
    New(String),

    /// A fetch completed and its response was handled
    Fetched(String),

    /// A fetch failed
    Failed(String),

    /// The controller cancelled the request
    Cancelled(String),
}

/// Links found on one page, on their way to the filter
#[derive(Debug)]
pub(crate) struct Batch {
    /// Request URL of the page
    pub source: String,
    pub links: Vec<Link>,
}

/// State every worker can reach
pub(crate) struct Shared {
    pub config: CrawlerConfig,
    pub default_charset: String,
    pub controller: Arc<dyn Controller>,
    pub store: Arc<dyn UrlStore>,
    pub client: Arc<dyn Client>,
    pub queue: Arc<WaitQueue>,
    pub limiter: RateLimiter,
    pub responses: ResponsePool,

    /// Set once to stop every worker
    pub quit: watch::Sender<bool>,

    /// Set by the scheduler when the store reports the crawl finished
    pub finished: watch::Sender<bool>,

    /// URLs dropped after the store failed to retire them
    pub abandoned: DashSet<String>,
}

impl Shared {
    /// Whether every known URL is done or was dropped on a store failure
    pub fn is_finished(&self) -> StoreResult<bool> {
        if self.abandoned.is_empty() {
            return self.store.is_finished();
        }
        let stats = self.store.stats()?;
        Ok(stats.done + self.abandoned.len() as u64 >= stats.known)
    }

    /// Flags the crawl finished if every known URL is done
    pub fn check_finished(&self) {
        match self.is_finished() {
            Ok(true) => {
                self.finished.send_replace(true);
            }
            Ok(false) => {}
            Err(e) => tracing::error!("Failed to check crawl completion: {}", e),
        }
    }

    /// Marks a URL done so it is never scheduled again
    ///
    /// Stages also retire a URL whose record they failed to update. If the
    /// store cannot record that either, the URL is remembered as abandoned so
    /// the crawl can still finish.
    pub fn retire(&self, loc: &str) {
        match self.store.update_func(loc, &mut |record| record.done = true) {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::error!("Cannot retire unknown URL {}", loc);
            }
            Err(e) => {
                tracing::error!("Failed to retire {}, abandoning it: {}", loc, e);
                self.abandoned.insert(loc.to_string());
            }
        }
        self.check_finished();
    }
}

/// Resolves once quit is signalled or the signal can no longer be sent
pub(crate) async fn quit_signalled(quit: &mut watch::Receiver<bool>) {
    let _ = quit.wait_for(|stop| *stop).await;
}

/// Sends `item` downstream unless quit is signalled first
///
/// Returns false if the item was not delivered.
pub(crate) async fn forward<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    quit: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        sent = tx.send(item) => sent.is_ok(),
        _ = quit_signalled(quit) => false,
    }
}

/// Takes the next item of a stage, or `None` once the stage should exit
pub(crate) async fn next<T>(
    rx: &SharedReceiver<T>,
    quit: &mut watch::Receiver<bool>,
) -> Option<T> {
    if *quit.borrow() {
        return None;
    }
    tokio::select! {
        item = async { rx.lock().await.recv().await } => item,
        _ = quit_signalled(quit) => None,
    }
}

/// Spawns `n` workers running `work(worker_id)`
pub(crate) fn spawn_workers<F, Fut>(name: &'static str, n: usize, work: F) -> Vec<JoinHandle<()>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    (0..n)
        .map(|id| {
            let fut = work(id);
            tokio::spawn(async move {
                fut.await;
                tracing::debug!("{} worker {} exited", name, id);
            })
        })
        .collect()
}

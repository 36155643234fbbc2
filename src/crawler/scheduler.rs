//! Scheduler stage
//!
//! Schedulers decide what happens to a URL after it is created or fetched:
//! - The controller's decision gives the score and earliest visit time
//! - The minimum revisit delay and the host's rate limit push that time back
//! - Failed fetches are retried after the retry delay, up to a limit
//! - Retired URLs are marked done; when every URL is done the crawl finishes

use crate::crawler::controller::Visit;
use crate::crawler::stage::{next, quit_signalled, SchedMsg, Shared, SharedReceiver};
use crate::queue::QueueItem;
use crate::state::{UrlRecord, UrlStatus};
use crate::url::host_key;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

/// Stand-in for visit times too far ahead to represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

pub(crate) async fn run(shared: Arc<Shared>, input: SharedReceiver<SchedMsg>) {
    let mut quit = shared.quit.subscribe();
    while let Some(msg) = next(&input, &mut quit).await {
        let ticket = match msg {
            SchedMsg::New(loc) | SchedMsg::Fetched(loc) => schedule(&shared, &loc),
            SchedMsg::Failed(loc) => retry(&shared, &loc),
            SchedMsg::Cancelled(loc) => {
                debug!("Retiring cancelled {}", loc);
                shared.retire(&loc);
                None
            }
        };
        let Some(ticket) = ticket else {
            continue;
        };

        let loc = ticket.url.clone();
        let pushed = tokio::select! {
            pushed = shared.queue.push(ticket) => pushed,
            _ = quit_signalled(&mut quit) => return,
        };
        if pushed.is_err() {
            return;
        }
        mark_enqueued(&shared, &loc);
    }
}

/// Asks the controller about a URL and builds its ticket
fn schedule(shared: &Shared, loc: &str) -> Option<QueueItem> {
    let record = load(shared, loc)?;
    if record.done {
        return None;
    }

    match shared.controller.schedule(&record) {
        Visit::Done => {
            debug!("{} is done after {} visits", loc, record.visit_count);
            shared.retire(loc);
            None
        }
        Visit::Next { score, at } => {
            let now = Utc::now();
            let at = earliest_visit(now, at, record.last_visit, shared.config.min_delay());
            ticket(shared, loc, score, now, at)
        }
    }
}

/// Reschedules a failed URL, or retires it once it has failed too often
fn retry(shared: &Shared, loc: &str) -> Option<QueueItem> {
    let record = load(shared, loc)?;
    if record.done {
        return None;
    }
    if record.error_count >= shared.config.max_retries {
        warn!("Giving up on {} after {} errors", loc, record.error_count);
        shared.retire(loc);
        return None;
    }

    let now = Utc::now();
    let delay = chrono::Duration::from_std(shared.config.retry_delay())
        .unwrap_or_else(|_| chrono::Duration::zero());
    let at = now.checked_add_signed(delay).unwrap_or(now);
    ticket(shared, loc, record.score, now, at)
}

/// Builds a ticket for `at`, spaced by the host's rate limit
fn ticket(
    shared: &Shared,
    loc: &str,
    score: i32,
    now: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Option<QueueItem> {
    let clock = Instant::now();
    let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
    let mut next = clock
        .checked_add(wait)
        .unwrap_or_else(|| clock + FAR_FUTURE);
    if let Some(host) = Url::parse(loc).ok().as_ref().and_then(host_key) {
        next = shared.limiter.reserve_at(&host, next);
    }

    let eligible = chrono::Duration::from_std(next.saturating_duration_since(clock))
        .ok()
        .and_then(|wait| now.checked_add_signed(wait))
        .unwrap_or(now);
    let updated = shared.store.update_func(loc, &mut |record| {
        record.status = UrlStatus::Waiting;
        record.score = score;
        record.next_eligible = Some(eligible);
    });
    if let Err(e) = updated {
        error!("Failed to schedule {}: {}", loc, e);
        shared.retire(loc);
        return None;
    }

    debug!("Scheduled {} (score {}) for {}", loc, score, eligible);
    Some(QueueItem::new(loc, score, next))
}

/// Earliest time a URL may be visited
///
/// The controller's time (or now) is never earlier than the last visit plus
/// the minimum revisit delay.
fn earliest_visit(
    now: DateTime<Utc>,
    at: Option<DateTime<Utc>>,
    last_visit: Option<DateTime<Utc>>,
    min_delay: Duration,
) -> DateTime<Utc> {
    let at = at.unwrap_or(now);
    let min_delay =
        chrono::Duration::from_std(min_delay).unwrap_or_else(|_| chrono::Duration::zero());
    match last_visit.and_then(|last| last.checked_add_signed(min_delay)) {
        Some(earliest) => at.max(earliest),
        None => at,
    }
}

fn load(shared: &Shared, loc: &str) -> Option<UrlRecord> {
    match shared.store.get(loc) {
        Ok(Some(record)) => Some(record),
        Ok(None) => {
            error!("{} should be in the store", loc);
            None
        }
        Err(e) => {
            error!("Failed to load {}: {}", loc, e);
            shared.retire(loc);
            None
        }
    }
}

/// Moves a waiting URL to enqueued; a maker may already have picked it up
fn mark_enqueued(shared: &Shared, loc: &str) {
    let updated = shared.store.update_func(loc, &mut |record| {
        if record.status == UrlStatus::Waiting {
            record.status = UrlStatus::Enqueued;
        }
    });
    if let Err(e) = updated {
        error!("Failed to update status of {}: {}", loc, e);
    }
}

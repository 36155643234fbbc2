//! Fetch stage
//!
//! Fetchers run each request through the client and record the outcome on
//! the URL record:
//! - Success marks the URL fetched, counts the visit and its time
//! - A redirect additionally marks the requested URL as redirected
//! - A failure counts an error and hands the URL back to the scheduler

use crate::client::{Request, Response};
use crate::crawler::stage::{forward, next, quit_signalled, SchedMsg, Shared, SharedReceiver};
use crate::state::UrlStatus;
use crate::FetchError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

pub(crate) async fn run(
    shared: Arc<Shared>,
    input: SharedReceiver<Request>,
    out: mpsc::Sender<Response>,
    sched: mpsc::Sender<SchedMsg>,
) {
    let mut quit = shared.quit.subscribe();
    while let Some(request) = next(&input, &mut quit).await {
        let result = tokio::select! {
            result = shared.client.execute(&request) => result,
            _ = quit_signalled(&mut quit) => return,
        };

        let delivered = match result {
            Ok(response) => match record_success(&shared, response) {
                Some(response) => forward(&out, response, &mut quit).await,
                None => true,
            },
            Err(e) if record_failure(&shared, &request, &e) => {
                let loc = request.record.loc.clone();
                forward(&sched, SchedMsg::Failed(loc), &mut quit).await
            }
            Err(_) => true,
        };
        if !delivered {
            return;
        }
    }
}

fn record_success(shared: &Shared, mut response: Response) -> Option<Response> {
    let loc = response.record.loc.clone();
    let redirected = response.is_redirected();
    let (at, last_modified) = (response.timestamp, response.last_modified());

    let mut snapshot = None;
    let updated = shared.store.update_func(&loc, &mut |record| {
        record.mark_fetched(at, last_modified);
        if redirected {
            record.status = UrlStatus::Redirected;
        }
        snapshot = Some(record.clone());
    });
    if let Err(e) = updated {
        error!("Failed to record fetch of {}: {}", loc, e);
        shared.retire(&loc);
        return None;
    }

    if redirected {
        debug!("{} redirected to {}", loc, response.url);
    } else {
        debug!(
            "Fetched {} ({}{})",
            loc,
            response.status,
            if response.from_cache { ", cached" } else { "" }
        );
    }

    if let Some(record) = snapshot {
        response.record = record;
    }
    Some(response)
}

/// Counts the error on the record; false if the URL had to be retired instead
fn record_failure(shared: &Shared, request: &Request, err: &FetchError) -> bool {
    let loc = &request.record.loc;
    match err.status() {
        Some(status) => warn!("Fetch of {} failed with status {}", loc, status),
        None => warn!("Fetch of {} failed: {}", loc, err),
    }

    if let Err(e) = shared.store.update_func(loc, &mut |record| record.mark_error()) {
        error!("Failed to record error for {}: {}", loc, e);
        shared.retire(loc);
        return false;
    }
    true
}

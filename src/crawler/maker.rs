//! Request construction
//!
//! Makers pop eligible tickets from the wait queue, mark the URL as being
//! fetched and let the controller prepare or cancel the request.

use crate::client::Request;
use crate::crawler::stage::{forward, quit_signalled, SchedMsg, Shared};
use crate::state::UrlStatus;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use url::Url;

pub(crate) async fn run(
    shared: Arc<Shared>,
    out: mpsc::Sender<Request>,
    sched: mpsc::Sender<SchedMsg>,
) {
    let mut quit = shared.quit.subscribe();
    loop {
        let item = tokio::select! {
            item = shared.queue.pop() => item,
            _ = quit_signalled(&mut quit) => None,
        };
        let Some(item) = item else {
            return;
        };

        let Some(request) = make_request(&shared, &item.url) else {
            continue;
        };

        let delivered = if request.is_cancelled() {
            debug!("Request for {} cancelled", request.url);
            forward(&sched, SchedMsg::Cancelled(item.url), &mut quit).await
        } else {
            forward(&out, request, &mut quit).await
        };
        if !delivered {
            return;
        }
    }
}

/// Builds the request for a ticket, or `None` if the URL must be skipped
fn make_request(shared: &Shared, loc: &str) -> Option<Request> {
    let url = match Url::parse(loc) {
        Ok(url) => url,
        Err(e) => {
            warn!("Skipping unparsable URL {}: {}", loc, e);
            shared.retire(loc);
            return None;
        }
    };

    let mut snapshot = None;
    let updated = shared.store.update_func(loc, &mut |record| {
        record.status = UrlStatus::Sieving;
        snapshot = Some(record.clone());
    });
    let record = match (updated, snapshot) {
        (Ok(()), Some(record)) => record,
        (Err(e), _) => {
            error!("Failed to mark {} as fetching: {}", loc, e);
            shared.retire(loc);
            return None;
        }
        (Ok(()), None) => return None,
    };
    let mut request = Request::new(url, record);
    shared.controller.prepare(&mut request);
    Some(request)
}

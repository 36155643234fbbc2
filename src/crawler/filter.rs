//! Link filter stage
//!
//! Filters turn discovered links into new URL records. A link becomes a record
//! only if it is unknown and the controller accepts it; creation goes through
//! `put_if_absent`, so concurrent discoveries of one URL create one record.

use crate::crawler::controller::Link;
use crate::crawler::stage::{forward, next, Batch, SchedMsg, Shared, SharedReceiver};
use crate::state::UrlRecord;
use crate::url::normalize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

pub(crate) async fn run(
    shared: Arc<Shared>,
    input: SharedReceiver<Batch>,
    sched: mpsc::Sender<SchedMsg>,
) {
    let mut quit = shared.quit.subscribe();
    while let Some(batch) = next(&input, &mut quit).await {
        for link in batch.links {
            if let Some(loc) = admit(&shared, link) {
                if !forward(&sched, SchedMsg::New(loc), &mut quit).await {
                    return;
                }
            }
        }

        // The source is rescheduled only after its links exist as records
        if !forward(&sched, SchedMsg::Fetched(batch.source), &mut quit).await {
            return;
        }
    }
}

/// Creates the record of a new, accepted link and returns its key
fn admit(shared: &Shared, mut link: Link) -> Option<String> {
    link.url = match normalize(link.url) {
        Ok(url) => url,
        Err(e) => {
            debug!("Dropping link: {}", e);
            return None;
        }
    };
    let loc = link.url.as_str();

    match shared.store.exist(loc) {
        Ok(false) => {}
        Ok(true) => return None,
        Err(e) => {
            error!("Failed to look up {}: {}", loc, e);
            return None;
        }
    }

    if !shared.controller.accept(&link) {
        debug!("Rejected {}", loc);
        return None;
    }

    match shared.store.put_if_absent(UrlRecord::new(loc, link.depth)) {
        Ok(true) => {
            debug!("Discovered {} at depth {}", loc, link.depth);
            Some(loc.to_string())
        }
        Ok(false) => None,
        Err(e) => {
            error!("Failed to create record for {}: {}", loc, e);
            None
        }
    }
}

//! Response handling stage
//!
//! Handlers decode each response (charset resolution and transcoding), pass it
//! to the controller and collect the links to consider next. A redirect target
//! and a refresh target count as links found on the page.

use crate::client::Response;
use crate::crawler::controller::Link;
use crate::crawler::stage::{forward, next, quit_signalled, Batch, Shared, SharedReceiver};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) async fn run(
    shared: Arc<Shared>,
    input: SharedReceiver<Response>,
    out: mpsc::Sender<Batch>,
) {
    let mut quit = shared.quit.subscribe();
    while let Some(mut response) = next(&input, &mut quit).await {
        response.content = shared.responses.acquire();
        let decoded = tokio::select! {
            decoded = response.decode(&shared.default_charset) => decoded,
            _ = quit_signalled(&mut quit) => return,
        };
        if let Err(e) = decoded {
            // The controller still sees whatever content was read
            warn!("Content of {} is incomplete: {}", response.url, e);
        }

        let links = collect_links(&shared, &response);
        debug!("{} yielded {} links", response.record.loc, links.len());
        shared.responses.release(response.take_content());

        let batch = Batch {
            source: response.record.loc.clone(),
            links,
        };
        if !forward(&out, batch, &mut quit).await {
            return;
        }
    }
}

fn collect_links(shared: &Shared, response: &Response) -> Vec<Link> {
    let depth = response.record.depth + 1;
    let mut links = Vec::new();

    if response.is_redirected() {
        links.push(Link {
            url: response.url.clone(),
            depth,
        });
    }
    if let Some(target) = response.refresh.as_ref().and_then(|r| r.url.as_ref()) {
        if *target != response.request_url {
            links.push(Link {
                url: target.clone(),
                depth,
            });
        }
    }

    links.extend(
        shared
            .controller
            .handle(response)
            .into_iter()
            .map(|link| Link { depth, ..link }),
    );
    links
}

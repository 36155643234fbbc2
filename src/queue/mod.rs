//! Wait queue of fetch tickets
//!
//! Tickets are ordered on two axes: a ticket is not handed out before its
//! eligibility time, and among eligible tickets the highest score goes first.

mod wait_queue;

pub use wait_queue::{QueueItem, WaitQueue};

use thiserror::Error;

/// Errors returned by the wait queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("wait queue is closed")]
    Closed,
}

use crate::queue::QueueError;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

/// A scheduled URL waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Normalized URL
    pub url: String,

    /// Priority; higher is handed out first
    pub score: i32,

    /// Earliest time the ticket may be popped
    pub next: Instant,
}

impl QueueItem {
    pub fn new(url: impl Into<String>, score: i32, next: Instant) -> Self {
        Self {
            url: url.into(),
            score,
            next,
        }
    }

    /// A ticket that is eligible immediately
    pub fn now(url: impl Into<String>, score: i32) -> Self {
        Self::new(url, score, Instant::now())
    }
}

/// A ticket together with its insertion sequence number
#[derive(Debug)]
struct Entry {
    item: QueueItem,
    seq: u64,
}

/// Orders entries by eligibility time, earliest first when wrapped in `Reverse`
#[derive(Debug)]
struct ByTime(Entry);

impl PartialEq for ByTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByTime {}

impl PartialOrd for ByTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .item
            .next
            .cmp(&other.0.item.next)
            .then(self.0.seq.cmp(&other.0.seq))
    }
}

/// Orders entries by score, then by insertion order for equal scores
#[derive(Debug)]
struct ByScore(Entry);

impl PartialEq for ByScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByScore {}

impl PartialOrd for ByScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .item
            .score
            .cmp(&other.0.item.score)
            .then(other.0.seq.cmp(&self.0.seq))
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Tickets not yet known to be eligible
    waiting: BinaryHeap<Reverse<ByTime>>,

    /// Eligible tickets
    ready: BinaryHeap<ByScore>,

    seq: u64,
    closed: bool,
}

impl Inner {
    fn len(&self) -> usize {
        self.waiting.len() + self.ready.len()
    }

    fn insert(&mut self, item: QueueItem) {
        let entry = Entry {
            item,
            seq: self.seq,
        };
        self.seq += 1;
        self.waiting.push(Reverse(ByTime(entry)));
    }

    /// Moves every ticket whose time has come into the ready heap
    fn promote(&mut self, now: Instant) {
        while self.earliest().is_some_and(|next| next <= now) {
            if let Some(Reverse(ByTime(entry))) = self.waiting.pop() {
                self.ready.push(ByScore(entry));
            }
        }
    }

    fn earliest(&self) -> Option<Instant> {
        self.waiting.peek().map(|top| top.0 .0.item.next)
    }
}

/// Bounded, blocking queue ordered by eligibility time and score
///
/// `push` waits while the queue is full and `pop` waits until a ticket becomes
/// eligible. Both return once the queue is closed: `push` with
/// `QueueError::Closed`, `pop` with `None` after draining the tickets that are
/// already eligible.
#[derive(Debug)]
pub struct WaitQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl WaitQueue {
    /// Creates a queue holding at most `capacity` tickets
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a ticket, waiting for room if the queue is full
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The ticket was queued
    /// * `Err(QueueError::Closed)` - The queue was closed before room freed up
    pub async fn push(&self, item: QueueItem) -> Result<(), QueueError> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(QueueError::Closed);
                }
                if inner.len() < self.capacity {
                    inner.insert(item);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Takes the highest scored eligible ticket, waiting until one exists
    ///
    /// Returns `None` once the queue is closed and no eligible ticket is left.
    pub async fn pop(&self) -> Option<QueueItem> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut inner = self.lock();
                inner.promote(Instant::now());

                if let Some(ByScore(entry)) = inner.ready.pop() {
                    let more = inner.len() > 0;
                    drop(inner);
                    self.not_full.notify_one();
                    // Let another popper look at what is left
                    if more {
                        self.not_empty.notify_one();
                    }
                    return Some(entry.item);
                }

                if inner.closed {
                    return None;
                }
                inner.earliest()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Closes the queue and wakes every blocked caller
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued tickets, eligible or not
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_pop_by_score() {
        let queue = WaitQueue::new(16);
        let now = Instant::now();
        queue.push(QueueItem::new("/100", 100, now)).await.unwrap();
        queue.push(QueueItem::new("/300", 300, now)).await.unwrap();
        queue.push(QueueItem::new("/200", 200, now)).await.unwrap();

        let order: Vec<i32> = vec![
            queue.pop().await.unwrap().score,
            queue.pop().await.unwrap().score,
            queue.pop().await.unwrap().score,
        ];
        assert_eq!(order, vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn test_equal_scores_are_fifo() {
        let queue = WaitQueue::new(16);
        let now = Instant::now();
        for url in ["/a", "/b", "/c"] {
            queue.push(QueueItem::new(url, 0, now)).await.unwrap();
        }
        assert_eq!(queue.pop().await.unwrap().url, "/a");
        assert_eq!(queue.pop().await.unwrap().url, "/b");
        assert_eq!(queue.pop().await.unwrap().url, "/c");
    }

    #[tokio::test]
    async fn test_pop_waits_for_eligibility() {
        let queue = WaitQueue::new(16);
        let start = Instant::now();
        // Pushed out of order on purpose
        for ms in [75u64, 25, 100, 50] {
            let item = QueueItem::new(format!("/{}", ms), 0, start + Duration::from_millis(ms));
            queue.push(item).await.unwrap();
        }

        for ms in [25u64, 50, 75, 100] {
            let item = queue.pop().await.unwrap();
            let elapsed = start.elapsed();
            assert_eq!(item.url, format!("/{}", ms));
            assert!(
                elapsed >= Duration::from_millis(ms),
                "{} popped after only {:?}",
                item.url,
                elapsed
            );
        }
    }

    #[tokio::test]
    async fn test_push_wakes_waiting_pop() {
        let queue = Arc::new(WaitQueue::new(4));
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(QueueItem::now("/x", 1)).await.unwrap();

        let item = timeout(Duration::from_secs(1), popper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.unwrap().url, "/x");
    }

    #[tokio::test]
    async fn test_earlier_push_rearms_timer() {
        let queue = Arc::new(WaitQueue::new(4));
        let start = Instant::now();
        queue
            .push(QueueItem::new("/late", 0, start + Duration::from_secs(10)))
            .await
            .unwrap();

        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue
            .push(QueueItem::new("/soon", 0, start + Duration::from_millis(30)))
            .await
            .unwrap();

        let item = timeout(Duration::from_secs(1), popper)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(item.url, "/soon");
    }

    #[tokio::test]
    async fn test_push_blocks_when_full() {
        let queue = Arc::new(WaitQueue::new(1));
        queue.push(QueueItem::now("/a", 0)).await.unwrap();

        let pusher = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(QueueItem::now("/b", 0)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pusher.is_finished());

        assert_eq!(queue.pop().await.unwrap().url, "/a");
        timeout(Duration::from_secs(1), pusher)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_callers() {
        let queue = Arc::new(WaitQueue::new(1));
        queue
            .push(QueueItem::new(
                "/future",
                0,
                Instant::now() + Duration::from_secs(60),
            ))
            .await
            .unwrap();

        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        let pusher = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(QueueItem::now("/b", 0)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let popped = timeout(Duration::from_secs(1), popper).await.unwrap().unwrap();
        assert!(popped.is_none());
        let pushed = timeout(Duration::from_secs(1), pusher).await.unwrap().unwrap();
        assert_eq!(pushed, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_close_drains_eligible_items() {
        let queue = WaitQueue::new(8);
        queue.push(QueueItem::now("/a", 1)).await.unwrap();
        queue.push(QueueItem::now("/b", 2)).await.unwrap();
        queue.close();

        assert_eq!(queue.pop().await.unwrap().url, "/b");
        assert_eq!(queue.pop().await.unwrap().url, "/a");
        assert!(queue.pop().await.is_none());
        assert_eq!(
            queue.push(QueueItem::now("/c", 0)).await,
            Err(QueueError::Closed)
        );
    }
}

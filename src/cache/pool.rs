use crate::cache::CacheControl;
use lru::LruCache;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, TRANSFER_ENCODING};
use std::sync::{Mutex, MutexGuard};

/// A stored response
///
/// The body is kept exactly as received, still content-encoded, so a cache hit
/// goes through the same decoding path as a network response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request URL, the pool key
    pub url: String,

    /// URL the response was finally served from after redirects
    pub final_url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub control: CacheControl,
}

impl CacheEntry {
    /// Bytes this entry counts against the pool budget
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

#[derive(Debug)]
struct PoolInner {
    entries: LruCache<String, CacheEntry>,
    size: usize,
}

impl PoolInner {
    fn remove(&mut self, url: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(url)?;
        self.size -= entry.size();
        Some(entry)
    }
}

/// In-memory HTTP cache bounded by the total size of stored bodies
///
/// Entries are evicted least recently used first.
#[derive(Debug)]
pub struct CachePool {
    max_bytes: usize,
    inner: Mutex<PoolInner>,
}

impl CachePool {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(PoolInner {
                entries: LruCache::unbounded(),
                size: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores an entry, replacing any entry for the same URL
    ///
    /// Returns false if the entry alone is larger than the pool.
    pub fn set(&self, entry: CacheEntry) -> bool {
        let mut inner = self.lock();
        inner.remove(&entry.url);

        if entry.size() > self.max_bytes {
            return false;
        }
        while inner.size + entry.size() > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((url, evicted)) => {
                    inner.size -= evicted.size();
                    tracing::trace!("Evicted {} from the cache pool", url);
                }
                None => break,
            }
        }

        inner.size += entry.size();
        inner.entries.put(entry.url.clone(), entry);
        true
    }

    /// Returns a copy of the entry for `url`, marking it recently used
    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        self.lock().entries.get(url).cloned()
    }

    pub fn remove(&self, url: &str) -> Option<CacheEntry> {
        self.lock().remove(url)
    }

    /// Applies a `304 Not Modified` answer to the entry for `url`
    ///
    /// # Arguments
    ///
    /// * `url` - Key of the entry
    /// * `control` - Cache metadata parsed from the 304 response
    /// * `headers` - Headers of the 304 response
    ///
    /// # Returns
    ///
    /// The entry as it now stands, or `None` if there was no entry or it is no
    /// longer cacheable and was removed. An answer older than the stored
    /// response leaves the entry untouched.
    pub fn update(
        &self,
        url: &str,
        control: Option<CacheControl>,
        headers: &HeaderMap,
    ) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let stale_answer = {
            let entry = inner.entries.get(url)?;
            control
                .as_ref()
                .is_some_and(|c| c.date < entry.control.date)
        };
        if stale_answer {
            return inner.entries.get(url).cloned();
        }

        let Some(control) = control else {
            inner.remove(url);
            return None;
        };

        let entry = inner.entries.get_mut(url)?;
        entry.control = control;
        merge_headers(&mut entry.headers, headers);
        Some(entry.clone())
    }

    /// Total size of the stored bodies
    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

/// Replaces every header of `base` that `update` carries
///
/// Framing headers describe the update's own (empty) body and are skipped.
pub fn merge_headers(base: &mut HeaderMap, update: &HeaderMap) {
    for name in update.keys() {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        base.remove(name);
        for value in update.get_all(name) {
            base.append(name.clone(), value.clone());
        }
    }
}

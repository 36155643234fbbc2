//! In-memory URL store
//!
//! Records live in a sharded concurrent map, so updates to one URL lock only
//! the shard holding it.

use crate::state::{UrlRecord, UrlStatus};
use crate::store::traits::{StoreError, StoreResult, StoreStats, UrlStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// URL store backed by a `DashMap`
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, UrlRecord>,
    known: AtomicU64,
    fetched: AtomicU64,
    errors: AtomicU64,
    done: AtomicU64,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Adjusts the counters for a record that changed from `before` to `after`
    fn account(&self, before: &Counted, after: &Counted) {
        bump(&self.fetched, before.fetched, after.fetched);
        bump(&self.errors, before.errored, after.errored);
        bump(&self.done, before.done, after.done);
    }
}

/// The parts of a record the aggregate counters depend on
struct Counted {
    fetched: bool,
    errored: bool,
    done: bool,
}

impl From<&UrlRecord> for Counted {
    fn from(record: &UrlRecord) -> Self {
        Self {
            fetched: record.visit_count > 0,
            errored: record.error_count > 0,
            done: record.done,
        }
    }
}

fn bump(counter: &AtomicU64, before: bool, after: bool) {
    match (before, after) {
        (false, true) => {
            counter.fetch_add(1, Ordering::AcqRel);
        }
        (true, false) => {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
        _ => {}
    }
}

impl UrlStore for MemoryStore {
    fn put_if_absent(&self, record: UrlRecord) -> StoreResult<bool> {
        self.check_open()?;
        match self.records.entry(record.loc.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let counted = Counted::from(&record);
                slot.insert(record);
                self.known.fetch_add(1, Ordering::AcqRel);
                self.account(
                    &Counted {
                        fetched: false,
                        errored: false,
                        done: false,
                    },
                    &counted,
                );
                Ok(true)
            }
        }
    }

    fn get(&self, url: &str) -> StoreResult<Option<UrlRecord>> {
        Ok(self.records.get(url).map(|r| r.value().clone()))
    }

    fn update_func(&self, url: &str, mutator: &mut dyn FnMut(&mut UrlRecord)) -> StoreResult<()> {
        self.check_open()?;
        let mut entry = self
            .records
            .get_mut(url)
            .ok_or_else(|| StoreError::NotFound(url.to_string()))?;

        let before = Counted::from(&*entry);
        mutator(&mut entry);
        // The key is the identity of the record
        entry.loc = url.to_string();
        let after = Counted::from(&*entry);
        self.account(&before, &after);
        Ok(())
    }

    fn exist(&self, url: &str) -> StoreResult<bool> {
        Ok(self.records.contains_key(url))
    }

    fn is_finished(&self) -> StoreResult<bool> {
        // Read done before known so a concurrent insert can only delay the answer
        let done = self.done.load(Ordering::Acquire);
        let known = self.known.load(Ordering::Acquire);
        Ok(done >= known)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats {
            done: self.done.load(Ordering::Acquire),
            known: self.known.load(Ordering::Acquire),
            fetched: self.fetched.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
        })
    }

    fn count_by_status(&self) -> StoreResult<Vec<(UrlStatus, u64)>> {
        let mut counts = [0u64; 7];
        for entry in self.records.iter() {
            let index = UrlStatus::all()
                .iter()
                .position(|s| *s == entry.status)
                .unwrap_or(0);
            counts[index] += 1;
        }
        Ok(UrlStatus::all()
            .into_iter()
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    fn pending(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| !entry.done)
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

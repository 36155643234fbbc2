//! URL store contract and error types
//!
//! This module defines the trait every URL store backend implements and the
//! associated error type.

use crate::state::{UrlRecord, UrlStatus};
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("URL not found: {0}")]
    NotFound(String),

    #[error("Store is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Aggregate counters over every record in a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records known to the store
    pub known: u64,

    /// Records fetched successfully at least once
    pub fetched: u64,

    /// Records that failed at least once
    pub errors: u64,

    /// Records retired from scheduling
    pub done: u64,
}

/// Trait for URL store backends
///
/// One record exists per normalized URL. Implementations must make
/// `put_if_absent` atomic per key and serialize `update_func` calls on the same
/// key so that no update is lost. All methods take `&self`; backends provide
/// their own interior locking.
pub trait UrlStore: Send + Sync {
    /// Inserts the record if its URL is unknown
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The record was created by this call
    /// * `Ok(false)` - A record for the URL already existed; nothing changed
    fn put_if_absent(&self, record: UrlRecord) -> StoreResult<bool>;

    /// Gets a snapshot of the record for a URL
    fn get(&self, url: &str) -> StoreResult<Option<UrlRecord>>;

    /// Reads the record, applies `mutator`, and writes it back atomically
    ///
    /// Fails with `StoreError::NotFound` when the URL is unknown.
    fn update_func(&self, url: &str, mutator: &mut dyn FnMut(&mut UrlRecord)) -> StoreResult<()>;

    /// Fast existence check
    fn exist(&self, url: &str) -> StoreResult<bool>;

    /// True iff every known record is done
    fn is_finished(&self) -> StoreResult<bool> {
        let stats = self.stats()?;
        Ok(stats.done >= stats.known)
    }

    /// Aggregate counters
    fn stats(&self) -> StoreResult<StoreStats>;

    /// Number of records per status, omitting empty statuses
    fn count_by_status(&self) -> StoreResult<Vec<(UrlStatus, u64)>>;

    /// URLs whose records are not done yet, used to resume a crawl
    fn pending(&self) -> StoreResult<Vec<String>>;

    /// Flushes the store; later mutations fail with `StoreError::Closed`
    fn close(&self) -> StoreResult<()>;
}

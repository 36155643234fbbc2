//! URL store
//!
//! This module keeps one record per normalized URL, including:
//! - Atomic insert-if-absent deduplication
//! - Per-URL serialized read-modify-write updates
//! - Aggregate counters and the crawl completion check
//! - Resumption support through the set of pending URLs
//!
//! Two backends are provided: an in-memory map and a SQLite database.

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{StoreError, StoreResult, StoreStats, UrlStore};

use crate::config::{StoreBackend, StoreConfig};
use std::path::Path;
use std::sync::Arc;

/// Metadata key holding the hash of the task file that last used the store
pub const TASK_HASH_KEY: &str = "task_hash";

/// Opens the store backend selected by the configuration
///
/// # Arguments
///
/// * `config` - Store section of the task configuration
/// * `task_hash` - Hash of the task file, recorded in persistent stores
///
/// # Returns
///
/// * `Ok(Arc<dyn UrlStore>)` - Ready store
/// * `Err(StoreError)` - Failed to open the database
pub fn open_store(config: &StoreConfig, task_hash: Option<&str>) -> StoreResult<Arc<dyn UrlStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Sqlite => {
            let store = SqliteStore::new(Path::new(&config.path))?;
            if let Some(hash) = task_hash {
                match store.get_meta(TASK_HASH_KEY)? {
                    Some(previous) if previous != hash => {
                        tracing::warn!(
                            "Task file changed since the store was created; resuming with the new task"
                        );
                    }
                    _ => {}
                }
                store.set_meta(TASK_HASH_KEY, hash)?;
            }
            Ok(Arc::new(store))
        }
    }
}

//! SQLite URL store
//!
//! This module provides a persistent implementation of the `UrlStore` trait.
//! A single connection sits behind a mutex, which serializes every operation
//! and makes `update_func` a read-modify-write inside one transaction.

use crate::state::{UrlRecord, UrlStatus};
use crate::store::schema::initialize_schema;
use crate::store::traits::{StoreError, StoreResult, StoreStats, UrlStore};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

const SELECT_COLUMNS: &str = "SELECT loc, depth, status, visit_count, error_count, last_visit, \
     last_modified, score, next_eligible, done FROM urls";

/// SQLite URL store backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SqliteStore {
    /// Opens or creates a store database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            closed: AtomicBool::new(false),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            closed: AtomicBool::new(false),
        })
    }

    /// Stores a metadata value
    pub fn set_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_open()?;
        self.lock().execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Reads a metadata value
    pub fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .lock()
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves SQLite consistent, so poisoning is ignored
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn count(&self, sql: &str) -> StoreResult<u64> {
        let n: i64 = self.lock().query_row(sql, [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|t| t.to_rfc3339())
}

fn parse_time(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StoreError::Serialization(format!("bad timestamp '{}': {}", s, e)))
        })
        .transpose()
}

/// Raw column values of one `urls` row
struct RawRow {
    loc: String,
    depth: i64,
    status: String,
    visit_count: i64,
    error_count: i64,
    last_visit: Option<String>,
    last_modified: Option<String>,
    score: i64,
    next_eligible: Option<String>,
    done: bool,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            loc: row.get(0)?,
            depth: row.get(1)?,
            status: row.get(2)?,
            visit_count: row.get(3)?,
            error_count: row.get(4)?,
            last_visit: row.get(5)?,
            last_modified: row.get(6)?,
            score: row.get(7)?,
            next_eligible: row.get(8)?,
            done: row.get(9)?,
        })
    }

    fn into_record(self) -> StoreResult<UrlRecord> {
        let status = UrlStatus::from_db_string(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("unknown status '{}'", self.status))
        })?;
        Ok(UrlRecord {
            loc: self.loc,
            depth: self.depth as u32,
            status,
            visit_count: self.visit_count as u32,
            error_count: self.error_count as u32,
            last_visit: parse_time(self.last_visit)?,
            last_modified: parse_time(self.last_modified)?,
            score: self.score as i32,
            next_eligible: parse_time(self.next_eligible)?,
            done: self.done,
        })
    }
}

fn select_record(conn: &Connection, url: &str) -> StoreResult<Option<UrlRecord>> {
    let raw = conn
        .query_row(
            &format!("{} WHERE loc = ?1", SELECT_COLUMNS),
            [url],
            RawRow::from_row,
        )
        .optional()?;
    raw.map(RawRow::into_record).transpose()
}

impl UrlStore for SqliteStore {
    fn put_if_absent(&self, record: UrlRecord) -> StoreResult<bool> {
        self.check_open()?;
        let inserted = self.lock().execute(
            "INSERT OR IGNORE INTO urls
                (loc, depth, status, visit_count, error_count, last_visit,
                 last_modified, score, next_eligible, done)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.loc,
                record.depth,
                record.status.to_db_string(),
                record.visit_count,
                record.error_count,
                format_time(record.last_visit),
                format_time(record.last_modified),
                record.score,
                format_time(record.next_eligible),
                record.done,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get(&self, url: &str) -> StoreResult<Option<UrlRecord>> {
        select_record(&self.lock(), url)
    }

    fn update_func(&self, url: &str, mutator: &mut dyn FnMut(&mut UrlRecord)) -> StoreResult<()> {
        self.check_open()?;
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let mut record =
            select_record(&tx, url)?.ok_or_else(|| StoreError::NotFound(url.to_string()))?;
        mutator(&mut record);

        tx.execute(
            "UPDATE urls SET depth = ?2, status = ?3, visit_count = ?4, error_count = ?5,
                last_visit = ?6, last_modified = ?7, score = ?8, next_eligible = ?9, done = ?10
             WHERE loc = ?1",
            params![
                url,
                record.depth,
                record.status.to_db_string(),
                record.visit_count,
                record.error_count,
                format_time(record.last_visit),
                format_time(record.last_modified),
                record.score,
                format_time(record.next_eligible),
                record.done,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn exist(&self, url: &str) -> StoreResult<bool> {
        let found = self
            .lock()
            .query_row("SELECT 1 FROM urls WHERE loc = ?1", [url], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn is_finished(&self) -> StoreResult<bool> {
        let pending = self.count("SELECT COUNT(*) FROM urls WHERE done = 0")?;
        Ok(pending == 0)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let conn = self.lock();
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(visit_count > 0), 0),
                    COALESCE(SUM(error_count > 0), 0),
                    COALESCE(SUM(done), 0)
             FROM urls",
            [],
            |row| {
                Ok(StoreStats {
                    known: row.get::<_, i64>(0)? as u64,
                    fetched: row.get::<_, i64>(1)? as u64,
                    errors: row.get::<_, i64>(2)? as u64,
                    done: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    fn count_by_status(&self) -> StoreResult<Vec<(UrlStatus, u64)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM urls GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = UrlStatus::from_db_string(&status) {
                counts.push((status, count as u64));
            }
        }
        Ok(counts)
    }

    fn pending(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT loc FROM urls WHERE done = 0 ORDER BY loc")?;
        let urls = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(urls)
    }

    fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Fold the WAL back into the main file; a no-op for in-memory databases
        self.lock()
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .optional()?;
        Ok(())
    }
}

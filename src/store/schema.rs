//! Database schema definitions
//!
//! This module contains the SQL schema for the persistent URL store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per normalized URL
CREATE TABLE IF NOT EXISTS urls (
    loc TEXT PRIMARY KEY NOT NULL,
    depth INTEGER NOT NULL,
    status TEXT NOT NULL,
    visit_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_visit TEXT,
    last_modified TEXT,
    score INTEGER NOT NULL DEFAULT 0,
    next_eligible TEXT,
    done INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_urls_status ON urls(status);
CREATE INDEX IF NOT EXISTS idx_urls_done ON urls(done);

-- Key/value metadata such as the hash of the task that created the store
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// Creates all tables and indexes if they don't exist.
pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["urls", "meta"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}

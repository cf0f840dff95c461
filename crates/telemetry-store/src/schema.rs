//! SQLite schema for the dedup and marker tables.

use rusqlite::{Connection, OptionalExtension, Result, Transaction, TransactionBehavior};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
///
/// Creates all tables if they don't exist. Safe to call from several processes
/// opening the same file: the check and the creation run in one `IMMEDIATE`
/// transaction, so initializers take turns on the write lock.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let current_version = get_schema_version(&tx)?;

    if current_version == 0 {
        create_tables(&tx)?;
        set_schema_version(&tx, SCHEMA_VERSION)?;
    }

    tx.commit()
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Day-scoped claims (timestamp) and counters (integer as text)
        CREATE TABLE IF NOT EXISTS dedup_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- TTL-scoped flags; a row past expires_at is treated as absent
        CREATE TABLE IF NOT EXISTS markers (
            key TEXT PRIMARY KEY,
            expires_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_markers_expires ON markers(expires_at);
        "#,
    )
}

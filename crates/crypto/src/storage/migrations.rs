//! Schema migrations for the SQLite key-value backend.

use rusqlite::Connection;

use super::StorageError;

const MIGRATIONS: &[(i32, &str)] = &[(1, MIGRATION_001)];

const MIGRATION_001: &str = "
CREATE TABLE IF NOT EXISTS kv_entries (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

pub fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _kv_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _kv_migrations",
        [],
        |row| row.get(0),
    )?;

    for &(version, sql) in MIGRATIONS {
        if version > current_version {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.execute("INSERT INTO _kv_migrations (version) VALUES (?1)", [version])?;
            tx.commit()?;
            tracing::debug!(version, "applied kv store migration");
        }
    }

    Ok(())
}

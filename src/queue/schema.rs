//! SQLite DDL for the offline queue.

use rusqlite::Connection;

/// Complete DDL for the queue database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

-- Every committed enqueue must survive power loss, not just process death.
PRAGMA synchronous = FULL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- AUTOINCREMENT keeps seq strictly increasing even after the tail is deleted.
CREATE TABLE IF NOT EXISTS pending_operations (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    http_method      TEXT NOT NULL,
    url              TEXT NOT NULL,
    normal_params    TEXT NOT NULL DEFAULT '[]',  -- JSON array of [key, value]
    json_payload     TEXT NOT NULL,
    destination_kind TEXT NOT NULL,
    enqueued_at      INTEGER NOT NULL DEFAULT 0
);
"#;

/// Apply the full schema to an open connection and seed the version stamp.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version_str = super::types::CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// Read the schema version, `None` when the stamp is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}

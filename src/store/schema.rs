//! Database schema for the context & side-effect store.

use rusqlite::Connection;

/// Current schema version recorded in `schema_meta`.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    user_id    TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    TEXT NOT NULL,
    session_id TEXT,
    role       TEXT NOT NULL,
    content    TEXT NOT NULL,
    timestamp  TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users (user_id)
);
CREATE INDEX IF NOT EXISTS idx_messages_user_timestamp
    ON messages (user_id, timestamp, id);

CREATE TABLE IF NOT EXISTS reminders (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      TEXT NOT NULL,
    title        TEXT NOT NULL,
    description  TEXT,
    due_date     TEXT NOT NULL,
    recurring    TEXT,
    completed    INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    FOREIGN KEY (user_id) REFERENCES users (user_id)
);
CREATE INDEX IF NOT EXISTS idx_reminders_user_due
    ON reminders (user_id, completed, due_date);

CREATE TABLE IF NOT EXISTS vault_items (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT NOT NULL,
    title       TEXT NOT NULL,
    category    TEXT NOT NULL,
    content     BLOB NOT NULL,
    created_at  TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users (user_id)
);
CREATE INDEX IF NOT EXISTS idx_vault_items_user_category
    ON vault_items (user_id, category, modified_at);

CREATE TABLE IF NOT EXISTS media_items (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          TEXT NOT NULL,
    title            TEXT NOT NULL,
    media_type       TEXT NOT NULL,
    file_path        TEXT NOT NULL,
    duration_seconds REAL,
    artist           TEXT,
    album            TEXT,
    FOREIGN KEY (user_id) REFERENCES users (user_id)
);
CREATE INDEX IF NOT EXISTS idx_media_items_user_type
    ON media_items (user_id, media_type);

CREATE TABLE IF NOT EXISTS metrics (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_type TEXT NOT NULL,
    metric_value REAL NOT NULL,
    metadata    TEXT,
    logged_at   TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1');
"#;

/// Apply the schema. Idempotent: safe to call on every open.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA_SQL)?;

    let version = read_schema_version(conn)?;
    if version != Some(CURRENT_SCHEMA_VERSION) {
        tracing::warn!(
            ?version,
            expected = CURRENT_SCHEMA_VERSION,
            "schema_meta version does not match the version this build expects"
        );
    }
    Ok(())
}

/// Read the schema version recorded in `schema_meta`, or `None` if absent.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| row.get::<_, String>(0),
    )
    .map(|v| v.parse().ok())
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        apply_schema(&conn).expect("first apply");
        apply_schema(&conn).expect("second apply");
        let version = read_schema_version(&conn).expect("read version");
        assert_eq!(version, Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn creates_all_tables() {
        let conn = Connection::open_in_memory().expect("open");
        apply_schema(&conn).expect("apply");
        for table in [
            "users",
            "messages",
            "reminders",
            "vault_items",
            "media_items",
            "metrics",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("query sqlite_master");
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn foreign_keys_reject_messages_for_an_unknown_user() {
        let conn = Connection::open_in_memory().expect("open");
        apply_schema(&conn).expect("apply");
        let result = conn.execute(
            "INSERT INTO messages (user_id, session_id, role, content, timestamp) \
             VALUES ('ghost', NULL, 'user', 'hi', '2030-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err(), "insert for a nonexistent user should violate the foreign key");
    }

    #[test]
    fn foreign_keys_accept_messages_for_a_known_user() {
        let conn = Connection::open_in_memory().expect("open");
        apply_schema(&conn).expect("apply");
        conn.execute(
            "INSERT INTO users (user_id, created_at) VALUES ('alice', '2030-01-01T00:00:00Z')",
            [],
        )
        .expect("insert user");
        conn.execute(
            "INSERT INTO messages (user_id, session_id, role, content, timestamp) \
             VALUES ('alice', NULL, 'user', 'hi', '2030-01-01T00:00:00Z')",
            [],
        )
        .expect("insert should succeed once the user row exists");
    }
}

//! Context & side-effect store: durable storage for conversation turns,
//! reminders, vault items, media-library entries, and metrics.
//!
//! Backed by a single SQLite database file, guarded by a `Mutex<Connection>`
//! so every operation sees a consistent, serialized view — the "exclusive
//! writer per operation" discipline the coordinator relies on.

mod schema;
pub mod types;

use std::path::Path;
use std::sync::Mutex;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::config::SecurityConfig;
pub use types::{ConversationTurn, MediaItem, Reminder, TurnRole, VaultItem};

/// Errors from the context & side-effect store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error opening or creating the database file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection mutex was poisoned by a panicking holder.
    #[error("store lock poisoned: {0}")]
    Lock(String),

    /// A referenced row (e.g. a reminder id) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored password verifier failed to parse.
    #[error("password hash error: {0}")]
    PasswordHash(String),
}

/// SQLite-backed context & side-effect store.
pub struct ContextStore {
    conn: Mutex<Connection>,
    security: SecurityConfig,
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore").finish_non_exhaustive()
    }
}

impl ContextStore {
    /// Open (or create) the database at `db_path`, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// connection cannot be opened.
    pub fn open(db_path: &Path, security: SecurityConfig) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            security,
        })
    }

    /// Open an in-memory store, for tests.
    pub fn open_in_memory(security: SecurityConfig) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            security,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Create the `users` row for `user_id` if it doesn't already exist.
    ///
    /// Every dependent table (`messages`, `reminders`, `vault_items`,
    /// `media_items`) carries a `FOREIGN KEY` on `user_id`; callers never
    /// register users up front, so each write path lazily ensures the
    /// parent row exists first, within the same locked connection.
    fn ensure_user(conn: &Connection, user_id: &str) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2)",
            params![user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Conversation context
    // -----------------------------------------------------------------

    /// Append one turn to `user_id`'s history.
    pub fn append_turn(
        &self,
        user_id: &str,
        role: TurnRole,
        content: &str,
        session_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "INSERT INTO messages (user_id, session_id, role, content, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                session_id,
                role.as_str(),
                content,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Return the last `limit` turns for `user_id`, oldest first.
    ///
    /// Fetches the newest `limit` rows in descending order, then reverses —
    /// the same two-step shape the reference implementation uses, so the
    /// `(user_id, timestamp, id)` index serves both the fetch and the tie
    /// break on insertion order.
    pub fn get_context(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, session_id, role, content, timestamp FROM messages \
             WHERE user_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let mut turns: Vec<ConversationTurn> = stmt
            .query_map(params![user_id, limit as i64], row_to_turn)?
            .collect::<rusqlite::Result<_>>()?;
        turns.reverse();
        Ok(turns)
    }

    /// Delete all turns for `user_id`.
    pub fn clear_context(&self, user_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM messages WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }

    /// Delete turns older than `days` days, across all users.
    pub fn prune_old_turns(&self, days: u32) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let deleted = conn.execute(
            "DELETE FROM messages WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }

    // -----------------------------------------------------------------
    // Reminders
    // -----------------------------------------------------------------

    /// Create a reminder, returning its assigned id.
    pub fn create_reminder(
        &self,
        user_id: &str,
        title: &str,
        due_date: DateTime<Utc>,
        description: Option<&str>,
        recurring: Option<&str>,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "INSERT INTO reminders (user_id, title, description, due_date, recurring) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, title, description, due_date.to_rfc3339(), recurring],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List active (not completed) reminders for `user_id`, due-date ascending.
    pub fn list_active_reminders(&self, user_id: &str) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, description, due_date, recurring, completed, completed_at \
             FROM reminders WHERE user_id = ?1 AND completed = 0 ORDER BY due_date ASC",
        )?;
        let reminders = stmt
            .query_map(params![user_id], row_to_reminder)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(reminders)
    }

    /// Mark a reminder completed.
    pub fn complete_reminder(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE reminders SET completed = 1, completed_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("reminder {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Vault
    // -----------------------------------------------------------------

    /// Store a vault item, returning its assigned id.
    pub fn store_vault_item(
        &self,
        user_id: &str,
        title: &str,
        content: &[u8],
        category: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        Self::ensure_user(&conn, user_id)?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO vault_items (user_id, title, category, content, created_at, modified_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![user_id, title, category, content, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List vault items for `user_id`, optionally filtered by category,
    /// modified-at descending.
    pub fn list_vault_items(
        &self,
        user_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<VaultItem>, StoreError> {
        let conn = self.lock()?;
        let items = if let Some(category) = category {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, category, content, created_at, modified_at \
                 FROM vault_items WHERE user_id = ?1 AND category = ?2 ORDER BY modified_at DESC",
            )?;
            stmt.query_map(params![user_id, category], row_to_vault_item)?
                .collect::<rusqlite::Result<_>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, category, content, created_at, modified_at \
                 FROM vault_items WHERE user_id = ?1 ORDER BY modified_at DESC",
            )?;
            stmt.query_map(params![user_id], row_to_vault_item)?
                .collect::<rusqlite::Result<_>>()?
        };
        Ok(items)
    }

    // -----------------------------------------------------------------
    // Media library
    // -----------------------------------------------------------------

    /// Add a media item, returning its assigned id.
    pub fn add_media_item(&self, item: &MediaItem) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        Self::ensure_user(&conn, &item.user_id)?;
        conn.execute(
            "INSERT INTO media_items \
             (user_id, title, media_type, file_path, duration_seconds, artist, album) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                item.user_id,
                item.title,
                item.media_type,
                item.file_path,
                item.duration_seconds,
                item.artist,
                item.album,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List media items for `user_id`, optionally filtered by media type.
    pub fn list_media_items(
        &self,
        user_id: &str,
        media_type: Option<&str>,
    ) -> Result<Vec<MediaItem>, StoreError> {
        let conn = self.lock()?;
        let items = if let Some(media_type) = media_type {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, media_type, file_path, duration_seconds, artist, album \
                 FROM media_items WHERE user_id = ?1 AND media_type = ?2 ORDER BY title",
            )?;
            stmt.query_map(params![user_id, media_type], row_to_media_item)?
                .collect::<rusqlite::Result<_>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, media_type, file_path, duration_seconds, artist, album \
                 FROM media_items WHERE user_id = ?1 ORDER BY title",
            )?;
            stmt.query_map(params![user_id], row_to_media_item)?
                .collect::<rusqlite::Result<_>>()?
        };
        Ok(items)
    }

    // -----------------------------------------------------------------
    // Metrics
    // -----------------------------------------------------------------

    /// Record a system metric.
    pub fn log_metric(
        &self,
        metric_type: &str,
        value: f64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let metadata_json = metadata.map(serde_json::Value::to_string);
        conn.execute(
            "INSERT INTO metrics (metric_type, metric_value, metadata, logged_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![metric_type, value, metadata_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Password verifiers
    // -----------------------------------------------------------------

    /// Hash `plain` into an Argon2id verifier using the store's configured
    /// `(time_cost, memory_cost_kib, parallelism)`.
    ///
    /// The plaintext itself is never stored; only the returned verifier is.
    pub fn hash_password(&self, plain: &str) -> Result<String, StoreError> {
        let argon2 = self.argon2()?;
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Verify `plain` against a previously produced `verifier`.
    pub fn verify_password(&self, verifier: &str, plain: &str) -> Result<bool, StoreError> {
        let argon2 = self.argon2()?;
        let parsed =
            PasswordHash::new(verifier).map_err(|e| StoreError::PasswordHash(e.to_string()))?;
        Ok(argon2.verify_password(plain.as_bytes(), &parsed).is_ok())
    }

    fn argon2(&self) -> Result<Argon2<'static>, StoreError> {
        let params = Params::new(
            self.security.argon2_memory_cost_kib,
            self.security.argon2_time_cost,
            self.security.argon2_parallelism,
            None,
        )
        .map_err(|e| StoreError::PasswordHash(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationTurn> {
    let role: String = row.get(2)?;
    let timestamp: String = row.get(4)?;
    Ok(ConversationTurn {
        user_id: row.get(0)?,
        session_id: row.get(1)?,
        role: TurnRole::from_str(&role),
        content: row.get(3)?,
        timestamp: parse_timestamp(&timestamp),
    })
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    let due_date: String = row.get(4)?;
    let completed_at: Option<String> = row.get(7)?;
    Ok(Reminder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        due_date: parse_timestamp(&due_date),
        recurring: row.get(5)?,
        completed: row.get::<_, i64>(6)? != 0,
        completed_at: completed_at.as_deref().map(parse_timestamp),
    })
}

fn row_to_vault_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<VaultItem> {
    let created_at: String = row.get(5)?;
    let modified_at: String = row.get(6)?;
    Ok(VaultItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        category: row.get(3)?,
        content: row.get(4)?,
        created_at: parse_timestamp(&created_at),
        modified_at: parse_timestamp(&modified_at),
    })
}

fn row_to_media_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaItem> {
    Ok(MediaItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        media_type: row.get(3)?,
        file_path: row.get(4)?,
        duration_seconds: row.get(5)?,
        artist: row.get(6)?,
        album: row.get(7)?,
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ContextStore {
        ContextStore::open_in_memory(SecurityConfig::default()).expect("open store")
    }

    #[test]
    fn context_is_chronological_and_capped() {
        let store = store();
        for i in 0..5 {
            store
                .append_turn("alice", TurnRole::User, &format!("msg {i}"), None)
                .expect("append");
        }
        let turns = store.get_context("alice", 3).expect("get_context");
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].content, "msg 2");
        assert_eq!(turns[2].content, "msg 4");
    }

    #[test]
    fn clear_context_removes_all_turns() {
        let store = store();
        store
            .append_turn("alice", TurnRole::User, "hi", None)
            .expect("append");
        store.clear_context("alice").expect("clear");
        assert!(store.get_context("alice", 10).expect("get").is_empty());
    }

    #[test]
    fn reminder_round_trip() {
        let store = store();
        let due = Utc::now() + chrono::Duration::days(1);
        let id = store
            .create_reminder("alice", "milk", due, None, None)
            .expect("create");
        let active = store.list_active_reminders("alice").expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
        assert!(!active[0].completed);

        store.complete_reminder(id).expect("complete");
        let active = store.list_active_reminders("alice").expect("list");
        assert!(active.is_empty());
    }

    #[test]
    fn complete_reminder_missing_id_errors() {
        let store = store();
        assert!(store.complete_reminder(999).is_err());
    }

    #[test]
    fn vault_round_trip_with_category_filter() {
        let store = store();
        store
            .store_vault_item("alice", "wifi", b"secret", "credential")
            .expect("store");
        store
            .store_vault_item("alice", "note", b"remember milk", "note")
            .expect("store");

        let creds = store
            .list_vault_items("alice", Some("credential"))
            .expect("list");
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].content, b"secret");

        let all = store.list_vault_items("alice", None).expect("list all");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn media_round_trip() {
        let store = store();
        let item = MediaItem {
            id: 0,
            user_id: "alice".to_owned(),
            title: "Song".to_owned(),
            media_type: "song".to_owned(),
            file_path: "/music/song.mp3".to_owned(),
            duration_seconds: Some(180.0),
            artist: Some("Artist".to_owned()),
            album: None,
        };
        store.add_media_item(&item).expect("add");
        let songs = store
            .list_media_items("alice", Some("song"))
            .expect("list");
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].file_path, "/music/song.mp3");
    }

    #[test]
    fn password_round_trip() {
        let store = store();
        let verifier = store.hash_password("correct horse").expect("hash");
        assert!(store.verify_password(&verifier, "correct horse").unwrap());
        assert!(!store.verify_password(&verifier, "wrong").unwrap());
    }

    #[test]
    fn prune_old_turns_deletes_only_expired() {
        let store = store();
        store
            .append_turn("alice", TurnRole::User, "recent", None)
            .expect("append");
        {
            let conn = store.lock().expect("lock");
            conn.execute(
                "UPDATE messages SET timestamp = ?1 WHERE content = 'recent'",
                params![(Utc::now() - chrono::Duration::days(40)).to_rfc3339()],
            )
            .expect("backdate");
        }
        store
            .append_turn("alice", TurnRole::User, "fresh", None)
            .expect("append");
        let deleted = store.prune_old_turns(30).expect("prune");
        assert_eq!(deleted, 1);
        let remaining = store.get_context("alice", 10).expect("get");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "fresh");
    }

    #[test]
    fn log_metric_does_not_error() {
        let store = store();
        store
            .log_metric("asr_latency", 0.42, None)
            .expect("log_metric");
    }
}

//! Shared types for the context & side-effect store.

use serde::{Deserialize, Serialize};

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Owning user.
    pub user_id: String,
    /// Correlation token spanning one or more turns; opaque to the store.
    pub session_id: Option<String>,
    /// Who produced the turn.
    pub role: TurnRole,
    /// Turn content, verbatim.
    pub content: String,
    /// When the turn was appended.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Who produced a [`ConversationTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The end user.
    User,
    /// The assistant.
    Assistant,
    /// System-injected context (not produced by either party).
    System,
}

impl TurnRole {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::System => "system",
        }
    }

    pub(crate) fn from_str(s: &str) -> Self {
        match s {
            "assistant" => TurnRole::Assistant,
            "system" => TurnRole::System,
            _ => TurnRole::User,
        }
    }
}

/// A reminder created via the `set_reminder` function call or directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    /// Monotonically increasing id assigned by the store.
    pub id: i64,
    /// Owning user.
    pub user_id: String,
    /// Short label.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// When the reminder is due.
    pub due_date: chrono::DateTime<chrono::Utc>,
    /// Optional recurrence pattern, opaque to the store.
    pub recurring: Option<String>,
    /// Whether the reminder has been completed.
    pub completed: bool,
    /// When it was completed, non-null iff `completed`.
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A vault category. The store never inspects `content`; category is the
/// only structured metadata it keeps about what a vault item holds.
pub type VaultCategory = String;

/// An opaque, user-owned vault entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultItem {
    /// Id assigned by the store.
    pub id: i64,
    /// Owning user.
    pub user_id: String,
    /// Short label.
    pub title: String,
    /// Caller-defined category (`note`, `credential`, ...).
    pub category: VaultCategory,
    /// Opaque payload, produced and consumed verbatim by the caller.
    pub content: Vec<u8>,
    /// When the item was created.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the item was last modified.
    pub modified_at: chrono::DateTime<chrono::Utc>,
}

/// A media-library entry (song, podcast episode, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Id assigned by the store.
    pub id: i64,
    /// Owning user.
    pub user_id: String,
    /// Display title.
    pub title: String,
    /// Caller-defined media kind (`song`, `podcast`, ...).
    pub media_type: String,
    /// Filesystem path to the underlying media file.
    pub file_path: String,
    /// Duration, if known.
    pub duration_seconds: Option<f64>,
    /// Artist, if known.
    pub artist: Option<String>,
    /// Album, if known.
    pub album: Option<String>,
}

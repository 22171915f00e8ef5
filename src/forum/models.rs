use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Moderation transitions recorded against a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ModAction {
    Pin,
    Unpin,
    Lock,
    Unlock,
    Delete,
    Restore,
}

/// One entry in a post's append-only moderation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationRecord {
    pub action: ModAction,
    pub performed_by: String, // actor user id
    pub performed_at: DateTime<Utc>,
    /// Value of the affected flag before this action ran
    pub previous_state: bool,
}

/// Database model for forum posts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostModel {
    pub id: String, // UUID v4 as string
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub username: String, // denormalized for display
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub reply_count: i64,
    pub moderation_log: Vec<ModerationRecord>,
}

impl PostModel {
    pub fn new(
        title: String,
        content: String,
        author_id: String,
        username: String,
        tags: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            content,
            author_id,
            username,
            tags,
            created_at: now,
            updated_at: now,
            is_pinned: false,
            is_locked: false,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            reply_count: 0,
            moderation_log: Vec::new(),
        }
    }

    /// The most recent moderation action, if any
    pub fn last_moderation(&self) -> Option<&ModerationRecord> {
        self.moderation_log.last()
    }
}

/// Database model for forum replies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyModel {
    pub id: String,
    pub post_id: String,
    pub content: String,
    pub author_id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edited: bool,
    pub is_deleted: bool,
}

impl ReplyModel {
    pub fn new(post_id: String, content: String, author_id: String, username: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            post_id,
            content,
            author_id,
            username,
            created_at: now,
            updated_at: now,
            edited: false,
            is_deleted: false,
        }
    }
}

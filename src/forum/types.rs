use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::{ModerationRecord, PostModel, ReplyModel};

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReplyRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListPostsParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Post shape returned by the API. Soft-deleted posts never reach this
/// type through public list/get paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostResponse {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub username: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub is_deleted: bool,
    pub reply_count: i64,
    pub last_moderation: Option<ModerationRecord>,
}

impl From<&PostModel> for PostResponse {
    fn from(post: &PostModel) -> Self {
        Self {
            id: post.id.clone(),
            title: post.title.clone(),
            content: post.content.clone(),
            author_id: post.author_id.clone(),
            username: post.username.clone(),
            tags: post.tags.clone(),
            created_at: post.created_at,
            updated_at: post.updated_at,
            is_pinned: post.is_pinned,
            is_locked: post.is_locked,
            is_deleted: post.is_deleted,
            reply_count: post.reply_count,
            last_moderation: post.last_moderation().cloned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyResponse {
    pub id: String,
    pub post_id: String,
    pub content: String,
    pub author_id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
}

impl From<&ReplyModel> for ReplyResponse {
    fn from(reply: &ReplyModel) -> Self {
        Self {
            id: reply.id.clone(),
            post_id: reply.post_id.clone(),
            content: reply.content.clone(),
            author_id: reply.author_id.clone(),
            username: reply.username.clone(),
            created_at: reply.created_at,
            edited: reply.edited,
        }
    }
}

/// GET /forum/posts/:id returns the post together with its visible replies
#[derive(Debug, Serialize, Deserialize)]
pub struct PostDetailResponse {
    pub post: PostResponse,
    pub replies: Vec<ReplyResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyDeletedResponse {
    pub message: String,
    pub reply_count: i64,
}

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::models::{ModAction, ModerationRecord, PostModel, ReplyModel};
use crate::shared::AppError;

/// Result of toggling a post's pin or lock flag
#[derive(Debug, Clone)]
pub enum ToggleOutcome {
    /// Flag flipped; returns the updated post
    Toggled(PostModel),
    PostNotFound,
}

/// Result of soft-deleting a post
#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    Deleted(PostModel),
    /// Idempotent set: the post was already deleted, nothing changed
    AlreadyDeleted(PostModel),
    PostNotFound,
}

/// Result of restoring a soft-deleted post
#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    Restored(PostModel),
    /// The post is not currently deleted
    NotDeleted,
    PostNotFound,
}

/// Result of attempting to create a reply
#[derive(Debug, Clone)]
pub enum CreateReplyOutcome {
    /// Reply stored and the parent's count incremented, atomically
    Created {
        reply: ReplyModel,
        reply_count: i64,
    },
    /// Parent post is locked; nothing was written
    PostLocked,
    /// Parent post is missing or soft-deleted
    PostNotFound,
}

/// Result of deleting a reply
#[derive(Debug, Clone)]
pub enum DeleteReplyOutcome {
    Deleted { reply_count: i64 },
    ReplyNotFound,
    PostNotFound,
}

/// Trait for forum storage operations.
///
/// Flag mutations are atomic: check, flip and history append happen in one
/// critical section (or one database transaction), so concurrent moderation
/// actions cannot lose updates.
#[async_trait]
pub trait ForumRepository {
    async fn create_post(&self, post: &PostModel) -> Result<(), AppError>;
    /// Fetches a post including soft-deleted ones; visibility is decided
    /// by the caller
    async fn get_post(&self, post_id: &str) -> Result<Option<PostModel>, AppError>;
    /// Non-deleted posts, pinned first, newest first
    async fn list_posts(&self, offset: u32, limit: u32) -> Result<Vec<PostModel>, AppError>;
    async fn update_post_content(
        &self,
        post_id: &str,
        title: &str,
        content: &str,
        tags: &[String],
    ) -> Result<Option<PostModel>, AppError>;

    async fn toggle_pin(&self, post_id: &str, actor_id: &str) -> Result<ToggleOutcome, AppError>;
    async fn toggle_lock(&self, post_id: &str, actor_id: &str) -> Result<ToggleOutcome, AppError>;
    async fn soft_delete_post(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> Result<DeleteOutcome, AppError>;
    async fn restore_post(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> Result<RestoreOutcome, AppError>;

    async fn try_create_reply(&self, reply: &ReplyModel)
        -> Result<CreateReplyOutcome, AppError>;
    async fn delete_reply(
        &self,
        post_id: &str,
        reply_id: &str,
    ) -> Result<DeleteReplyOutcome, AppError>;
    async fn get_reply(&self, reply_id: &str) -> Result<Option<ReplyModel>, AppError>;
    /// Non-deleted replies for a post, oldest first
    async fn list_replies(&self, post_id: &str) -> Result<Vec<ReplyModel>, AppError>;
}

#[derive(Clone, Copy)]
enum ToggleFlag {
    Pin,
    Lock,
}

impl ToggleFlag {
    fn action_for(&self, new_value: bool) -> ModAction {
        match (self, new_value) {
            (ToggleFlag::Pin, true) => ModAction::Pin,
            (ToggleFlag::Pin, false) => ModAction::Unpin,
            (ToggleFlag::Lock, true) => ModAction::Lock,
            (ToggleFlag::Lock, false) => ModAction::Unlock,
        }
    }
}

/// In-memory implementation of ForumRepository for development and testing.
///
/// Posts and replies live behind a single mutex so the cross-entity
/// operations (reply creation, count maintenance) stay atomic.
#[derive(Default)]
struct ForumStore {
    posts: HashMap<String, PostModel>,
    replies: HashMap<String, ReplyModel>,
}

pub struct InMemoryForumRepository {
    store: Mutex<ForumStore>,
}

impl Default for InMemoryForumRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryForumRepository {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(ForumStore::default()),
        }
    }

    fn toggle(&self, post_id: &str, actor_id: &str, flag: ToggleFlag) -> ToggleOutcome {
        let mut store = self.store.lock().unwrap();
        let Some(post) = store.posts.get_mut(post_id) else {
            return ToggleOutcome::PostNotFound;
        };

        let previous = match flag {
            ToggleFlag::Pin => post.is_pinned,
            ToggleFlag::Lock => post.is_locked,
        };
        let new_value = !previous;
        match flag {
            ToggleFlag::Pin => post.is_pinned = new_value,
            ToggleFlag::Lock => post.is_locked = new_value,
        }

        post.updated_at = Utc::now();
        post.moderation_log.push(ModerationRecord {
            action: flag.action_for(new_value),
            performed_by: actor_id.to_string(),
            performed_at: post.updated_at,
            previous_state: previous,
        });

        ToggleOutcome::Toggled(post.clone())
    }
}

#[async_trait]
impl ForumRepository for InMemoryForumRepository {
    #[instrument(skip(self, post))]
    async fn create_post(&self, post: &PostModel) -> Result<(), AppError> {
        debug!(post_id = %post.id, username = %post.username, "Creating post in memory");

        let mut store = self.store.lock().unwrap();
        if store.posts.contains_key(&post.id) {
            warn!(post_id = %post.id, "Post already exists in memory");
            return Err(AppError::Conflict("Post already exists".to_string()));
        }
        store.posts.insert(post.id.clone(), post.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_post(&self, post_id: &str) -> Result<Option<PostModel>, AppError> {
        let store = self.store.lock().unwrap();
        Ok(store.posts.get(post_id).cloned())
    }

    #[instrument(skip(self))]
    async fn list_posts(&self, offset: u32, limit: u32) -> Result<Vec<PostModel>, AppError> {
        let store = self.store.lock().unwrap();
        let mut posts: Vec<PostModel> = store
            .posts
            .values()
            .filter(|p| !p.is_deleted)
            .cloned()
            .collect();

        // Pinned first, then newest first
        posts.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.created_at.cmp(&a.created_at))
        });

        Ok(posts
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    #[instrument(skip(self, title, content, tags))]
    async fn update_post_content(
        &self,
        post_id: &str,
        title: &str,
        content: &str,
        tags: &[String],
    ) -> Result<Option<PostModel>, AppError> {
        let mut store = self.store.lock().unwrap();
        let Some(post) = store.posts.get_mut(post_id) else {
            return Ok(None);
        };

        post.title = title.to_string();
        post.content = content.to_string();
        post.tags = tags.to_vec();
        post.updated_at = Utc::now();
        Ok(Some(post.clone()))
    }

    #[instrument(skip(self))]
    async fn toggle_pin(&self, post_id: &str, actor_id: &str) -> Result<ToggleOutcome, AppError> {
        Ok(self.toggle(post_id, actor_id, ToggleFlag::Pin))
    }

    #[instrument(skip(self))]
    async fn toggle_lock(&self, post_id: &str, actor_id: &str) -> Result<ToggleOutcome, AppError> {
        Ok(self.toggle(post_id, actor_id, ToggleFlag::Lock))
    }

    #[instrument(skip(self))]
    async fn soft_delete_post(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> Result<DeleteOutcome, AppError> {
        let mut store = self.store.lock().unwrap();
        let Some(post) = store.posts.get_mut(post_id) else {
            return Ok(DeleteOutcome::PostNotFound);
        };

        if post.is_deleted {
            return Ok(DeleteOutcome::AlreadyDeleted(post.clone()));
        }

        let now = Utc::now();
        post.is_deleted = true;
        post.deleted_at = Some(now);
        post.deleted_by = Some(actor_id.to_string());
        post.updated_at = now;
        post.moderation_log.push(ModerationRecord {
            action: ModAction::Delete,
            performed_by: actor_id.to_string(),
            performed_at: now,
            previous_state: false,
        });

        Ok(DeleteOutcome::Deleted(post.clone()))
    }

    #[instrument(skip(self))]
    async fn restore_post(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> Result<RestoreOutcome, AppError> {
        let mut store = self.store.lock().unwrap();
        let Some(post) = store.posts.get_mut(post_id) else {
            return Ok(RestoreOutcome::PostNotFound);
        };

        if !post.is_deleted {
            return Ok(RestoreOutcome::NotDeleted);
        }

        let now = Utc::now();
        post.is_deleted = false;
        post.deleted_at = None;
        post.deleted_by = None;
        post.updated_at = now;
        post.moderation_log.push(ModerationRecord {
            action: ModAction::Restore,
            performed_by: actor_id.to_string(),
            performed_at: now,
            previous_state: true,
        });

        Ok(RestoreOutcome::Restored(post.clone()))
    }

    #[instrument(skip(self, reply))]
    async fn try_create_reply(
        &self,
        reply: &ReplyModel,
    ) -> Result<CreateReplyOutcome, AppError> {
        let mut store = self.store.lock().unwrap();

        // Reject before any write; the count only moves with the insert
        let Some(post) = store.posts.get_mut(&reply.post_id) else {
            return Ok(CreateReplyOutcome::PostNotFound);
        };
        if post.is_deleted {
            return Ok(CreateReplyOutcome::PostNotFound);
        }
        if post.is_locked {
            debug!(post_id = %reply.post_id, "Reply rejected: post is locked");
            return Ok(CreateReplyOutcome::PostLocked);
        }

        post.reply_count += 1;
        let reply_count = post.reply_count;
        store.replies.insert(reply.id.clone(), reply.clone());

        Ok(CreateReplyOutcome::Created {
            reply: reply.clone(),
            reply_count,
        })
    }

    #[instrument(skip(self))]
    async fn delete_reply(
        &self,
        post_id: &str,
        reply_id: &str,
    ) -> Result<DeleteReplyOutcome, AppError> {
        let mut store = self.store.lock().unwrap();

        match store.replies.get_mut(reply_id) {
            Some(reply) if reply.post_id == post_id && !reply.is_deleted => {
                reply.is_deleted = true;
                reply.updated_at = Utc::now();
            }
            _ => return Ok(DeleteReplyOutcome::ReplyNotFound),
        }

        let Some(post) = store.posts.get_mut(post_id) else {
            return Ok(DeleteReplyOutcome::PostNotFound);
        };
        post.reply_count = (post.reply_count - 1).max(0);

        Ok(DeleteReplyOutcome::Deleted {
            reply_count: post.reply_count,
        })
    }

    #[instrument(skip(self))]
    async fn get_reply(&self, reply_id: &str) -> Result<Option<ReplyModel>, AppError> {
        let store = self.store.lock().unwrap();
        Ok(store.replies.get(reply_id).cloned())
    }

    #[instrument(skip(self))]
    async fn list_replies(&self, post_id: &str) -> Result<Vec<ReplyModel>, AppError> {
        let store = self.store.lock().unwrap();
        let mut replies: Vec<ReplyModel> = store
            .replies
            .values()
            .filter(|r| r.post_id == post_id && !r.is_deleted)
            .cloned()
            .collect();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(replies)
    }
}

/// PostgreSQL implementation of forum repository.
///
/// Every flag mutation is a single UPDATE (or a row-locked transaction), so
/// concurrent moderation actions serialize in the database instead of
/// racing through read-then-save.
pub struct PostgresForumRepository {
    pool: PgPool,
}

impl PostgresForumRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_moderation_record(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        post_id: &str,
        record: &ModerationRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO post_moderation_log \
             (id, post_id, action, performed_by, performed_at, previous_state) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(post_id)
        .bind(record.action.to_string())
        .bind(&record.performed_by)
        .bind(record.performed_at)
        .bind(record.previous_state)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_moderation_log(
        &self,
        post_ids: &[String],
    ) -> Result<HashMap<String, Vec<ModerationRecord>>, AppError> {
        let rows = sqlx::query(
            "SELECT post_id, action, performed_by, performed_at, previous_state \
             FROM post_moderation_log WHERE post_id = ANY($1) ORDER BY performed_at",
        )
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to fetch moderation log");
            AppError::Database(e.to_string())
        })?;

        let mut by_post: HashMap<String, Vec<ModerationRecord>> = HashMap::new();
        for row in rows {
            let action: String = row.get("action");
            let action: ModAction = action.parse().map_err(|_| {
                warn!(value = %action, "Unrecognized moderation action in log");
                AppError::Internal
            })?;
            by_post
                .entry(row.get("post_id"))
                .or_default()
                .push(ModerationRecord {
                    action,
                    performed_by: row.get("performed_by"),
                    performed_at: row.get("performed_at"),
                    previous_state: row.get("previous_state"),
                });
        }
        Ok(by_post)
    }

    async fn fetch_post_with_log(&self, post_id: &str) -> Result<Option<PostModel>, AppError> {
        let row = sqlx::query(
            "SELECT id, title, content, author_id, username, tags, created_at, updated_at, \
             is_pinned, is_locked, is_deleted, deleted_at, deleted_by, reply_count \
             FROM forum_posts WHERE id = $1",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, post_id, "Failed to fetch post from database");
            AppError::Database(e.to_string())
        })?;

        let Some(row) = row else { return Ok(None) };

        let mut log = self
            .fetch_moderation_log(&[post_id.to_string()])
            .await?
            .remove(post_id)
            .unwrap_or_default();
        log.sort_by(|a, b| a.performed_at.cmp(&b.performed_at));

        Ok(Some(row_to_post(&row, log)))
    }

    async fn toggle(
        &self,
        post_id: &str,
        actor_id: &str,
        flag: ToggleFlag,
    ) -> Result<ToggleOutcome, AppError> {
        let sql = match flag {
            ToggleFlag::Pin => {
                "UPDATE forum_posts SET is_pinned = NOT is_pinned, updated_at = NOW() \
                 WHERE id = $1 RETURNING is_pinned AS flag"
            }
            ToggleFlag::Lock => {
                "UPDATE forum_posts SET is_locked = NOT is_locked, updated_at = NOW() \
                 WHERE id = $1 RETURNING is_locked AS flag"
            }
        };

        let mut tx = self.pool.begin().await.map_err(|e| {
            warn!(error = %e, "Failed to begin transaction");
            AppError::Database(e.to_string())
        })?;

        let row = sqlx::query(sql)
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                warn!(error = %e, post_id, "Failed to toggle post flag");
                AppError::Database(e.to_string())
            })?;

        let Some(row) = row else {
            return Ok(ToggleOutcome::PostNotFound);
        };
        let new_value: bool = row.get("flag");

        let record = ModerationRecord {
            action: flag.action_for(new_value),
            performed_by: actor_id.to_string(),
            performed_at: Utc::now(),
            previous_state: !new_value,
        };
        Self::insert_moderation_record(&mut tx, post_id, &record)
            .await
            .map_err(|e| {
                warn!(error = %e, post_id, "Failed to record moderation action");
                AppError::Database(e.to_string())
            })?;

        tx.commit().await.map_err(|e| {
            warn!(error = %e, "Failed to commit toggle transaction");
            AppError::Database(e.to_string())
        })?;

        let post = self
            .fetch_post_with_log(post_id)
            .await?
            .ok_or(AppError::Internal)?;
        Ok(ToggleOutcome::Toggled(post))
    }
}

fn row_to_post(row: &PgRow, moderation_log: Vec<ModerationRecord>) -> PostModel {
    PostModel {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        author_id: row.get("author_id"),
        username: row.get("username"),
        tags: row.get("tags"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        is_pinned: row.get("is_pinned"),
        is_locked: row.get("is_locked"),
        is_deleted: row.get("is_deleted"),
        deleted_at: row.get("deleted_at"),
        deleted_by: row.get("deleted_by"),
        reply_count: row.get("reply_count"),
        moderation_log,
    }
}

fn row_to_reply(row: &PgRow) -> ReplyModel {
    ReplyModel {
        id: row.get("id"),
        post_id: row.get("post_id"),
        content: row.get("content"),
        author_id: row.get("author_id"),
        username: row.get("username"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        edited: row.get("edited"),
        is_deleted: row.get("is_deleted"),
    }
}

#[async_trait]
impl ForumRepository for PostgresForumRepository {
    #[instrument(skip(self, post))]
    async fn create_post(&self, post: &PostModel) -> Result<(), AppError> {
        debug!(post_id = %post.id, username = %post.username, "Creating post in database");

        sqlx::query(
            "INSERT INTO forum_posts \
             (id, title, content, author_id, username, tags, created_at, updated_at, \
              is_pinned, is_locked, is_deleted, deleted_at, deleted_by, reply_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(&post.id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.author_id)
        .bind(&post.username)
        .bind(&post.tags)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(post.is_pinned)
        .bind(post.is_locked)
        .bind(post.is_deleted)
        .bind(post.deleted_at)
        .bind(&post.deleted_by)
        .bind(post.reply_count)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create post in database");
            AppError::Database(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_post(&self, post_id: &str) -> Result<Option<PostModel>, AppError> {
        self.fetch_post_with_log(post_id).await
    }

    #[instrument(skip(self))]
    async fn list_posts(&self, offset: u32, limit: u32) -> Result<Vec<PostModel>, AppError> {
        let rows = sqlx::query(
            "SELECT id, title, content, author_id, username, tags, created_at, updated_at, \
             is_pinned, is_locked, is_deleted, deleted_at, deleted_by, reply_count \
             FROM forum_posts WHERE NOT is_deleted \
             ORDER BY is_pinned DESC, created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to list posts from database");
            AppError::Database(e.to_string())
        })?;

        let ids: Vec<String> = rows.iter().map(|r| r.get("id")).collect();
        let mut logs = self.fetch_moderation_log(&ids).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                let log = logs.remove(&id).unwrap_or_default();
                row_to_post(row, log)
            })
            .collect())
    }

    #[instrument(skip(self, title, content, tags))]
    async fn update_post_content(
        &self,
        post_id: &str,
        title: &str,
        content: &str,
        tags: &[String],
    ) -> Result<Option<PostModel>, AppError> {
        let result = sqlx::query(
            "UPDATE forum_posts SET title = $2, content = $3, tags = $4, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(post_id)
        .bind(title)
        .bind(content)
        .bind(tags)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, post_id, "Failed to update post in database");
            AppError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_post_with_log(post_id).await
    }

    #[instrument(skip(self))]
    async fn toggle_pin(&self, post_id: &str, actor_id: &str) -> Result<ToggleOutcome, AppError> {
        self.toggle(post_id, actor_id, ToggleFlag::Pin).await
    }

    #[instrument(skip(self))]
    async fn toggle_lock(&self, post_id: &str, actor_id: &str) -> Result<ToggleOutcome, AppError> {
        self.toggle(post_id, actor_id, ToggleFlag::Lock).await
    }

    #[instrument(skip(self))]
    async fn soft_delete_post(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> Result<DeleteOutcome, AppError> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(|e| {
            warn!(error = %e, "Failed to begin transaction");
            AppError::Database(e.to_string())
        })?;

        let result = sqlx::query(
            "UPDATE forum_posts \
             SET is_deleted = TRUE, deleted_at = $2, deleted_by = $3, updated_at = $2 \
             WHERE id = $1 AND NOT is_deleted",
        )
        .bind(post_id)
        .bind(now)
        .bind(actor_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            warn!(error = %e, post_id, "Failed to soft-delete post");
            AppError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            drop(tx);
            // Missing or already deleted; report which
            return match self.fetch_post_with_log(post_id).await? {
                Some(post) => Ok(DeleteOutcome::AlreadyDeleted(post)),
                None => Ok(DeleteOutcome::PostNotFound),
            };
        }

        let record = ModerationRecord {
            action: ModAction::Delete,
            performed_by: actor_id.to_string(),
            performed_at: now,
            previous_state: false,
        };
        Self::insert_moderation_record(&mut tx, post_id, &record)
            .await
            .map_err(|e| {
                warn!(error = %e, post_id, "Failed to record deletion");
                AppError::Database(e.to_string())
            })?;

        tx.commit().await.map_err(|e| {
            warn!(error = %e, "Failed to commit delete transaction");
            AppError::Database(e.to_string())
        })?;

        let post = self
            .fetch_post_with_log(post_id)
            .await?
            .ok_or(AppError::Internal)?;
        Ok(DeleteOutcome::Deleted(post))
    }

    #[instrument(skip(self))]
    async fn restore_post(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> Result<RestoreOutcome, AppError> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(|e| {
            warn!(error = %e, "Failed to begin transaction");
            AppError::Database(e.to_string())
        })?;

        let result = sqlx::query(
            "UPDATE forum_posts \
             SET is_deleted = FALSE, deleted_at = NULL, deleted_by = NULL, updated_at = $2 \
             WHERE id = $1 AND is_deleted",
        )
        .bind(post_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            warn!(error = %e, post_id, "Failed to restore post");
            AppError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            drop(tx);
            return match self.fetch_post_with_log(post_id).await? {
                Some(_) => Ok(RestoreOutcome::NotDeleted),
                None => Ok(RestoreOutcome::PostNotFound),
            };
        }

        let record = ModerationRecord {
            action: ModAction::Restore,
            performed_by: actor_id.to_string(),
            performed_at: now,
            previous_state: true,
        };
        Self::insert_moderation_record(&mut tx, post_id, &record)
            .await
            .map_err(|e| {
                warn!(error = %e, post_id, "Failed to record restore");
                AppError::Database(e.to_string())
            })?;

        tx.commit().await.map_err(|e| {
            warn!(error = %e, "Failed to commit restore transaction");
            AppError::Database(e.to_string())
        })?;

        let post = self
            .fetch_post_with_log(post_id)
            .await?
            .ok_or(AppError::Internal)?;
        Ok(RestoreOutcome::Restored(post))
    }

    #[instrument(skip(self, reply))]
    async fn try_create_reply(
        &self,
        reply: &ReplyModel,
    ) -> Result<CreateReplyOutcome, AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            warn!(error = %e, "Failed to begin transaction");
            AppError::Database(e.to_string())
        })?;

        // Row lock so the locked-check and the insert are one atomic step
        let row = sqlx::query("SELECT is_locked, is_deleted FROM forum_posts WHERE id = $1 FOR UPDATE")
            .bind(&reply.post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                warn!(error = %e, post_id = %reply.post_id, "Failed to check parent post");
                AppError::Database(e.to_string())
            })?;

        let Some(row) = row else {
            return Ok(CreateReplyOutcome::PostNotFound);
        };
        if row.get::<bool, _>("is_deleted") {
            return Ok(CreateReplyOutcome::PostNotFound);
        }
        if row.get::<bool, _>("is_locked") {
            debug!(post_id = %reply.post_id, "Reply rejected: post is locked");
            return Ok(CreateReplyOutcome::PostLocked);
        }

        sqlx::query(
            "INSERT INTO forum_replies \
             (id, post_id, content, author_id, username, created_at, updated_at, edited, is_deleted) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&reply.id)
        .bind(&reply.post_id)
        .bind(&reply.content)
        .bind(&reply.author_id)
        .bind(&reply.username)
        .bind(reply.created_at)
        .bind(reply.updated_at)
        .bind(reply.edited)
        .bind(reply.is_deleted)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to insert reply");
            AppError::Database(e.to_string())
        })?;

        let row = sqlx::query(
            "UPDATE forum_posts SET reply_count = reply_count + 1 WHERE id = $1 \
             RETURNING reply_count",
        )
        .bind(&reply.post_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to increment reply count");
            AppError::Database(e.to_string())
        })?;
        let reply_count: i64 = row.get("reply_count");

        tx.commit().await.map_err(|e| {
            warn!(error = %e, "Failed to commit reply transaction");
            AppError::Database(e.to_string())
        })?;

        Ok(CreateReplyOutcome::Created {
            reply: reply.clone(),
            reply_count,
        })
    }

    #[instrument(skip(self))]
    async fn delete_reply(
        &self,
        post_id: &str,
        reply_id: &str,
    ) -> Result<DeleteReplyOutcome, AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            warn!(error = %e, "Failed to begin transaction");
            AppError::Database(e.to_string())
        })?;

        let result = sqlx::query(
            "UPDATE forum_replies SET is_deleted = TRUE, updated_at = NOW() \
             WHERE id = $1 AND post_id = $2 AND NOT is_deleted",
        )
        .bind(reply_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            warn!(error = %e, reply_id, "Failed to delete reply");
            AppError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Ok(DeleteReplyOutcome::ReplyNotFound);
        }

        let row = sqlx::query(
            "UPDATE forum_posts SET reply_count = GREATEST(reply_count - 1, 0) WHERE id = $1 \
             RETURNING reply_count",
        )
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to decrement reply count");
            AppError::Database(e.to_string())
        })?;

        let Some(row) = row else {
            return Ok(DeleteReplyOutcome::PostNotFound);
        };
        let reply_count: i64 = row.get("reply_count");

        tx.commit().await.map_err(|e| {
            warn!(error = %e, "Failed to commit reply deletion");
            AppError::Database(e.to_string())
        })?;

        Ok(DeleteReplyOutcome::Deleted { reply_count })
    }

    #[instrument(skip(self))]
    async fn get_reply(&self, reply_id: &str) -> Result<Option<ReplyModel>, AppError> {
        let row = sqlx::query(
            "SELECT id, post_id, content, author_id, username, created_at, updated_at, \
             edited, is_deleted FROM forum_replies WHERE id = $1",
        )
        .bind(reply_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, reply_id, "Failed to fetch reply from database");
            AppError::Database(e.to_string())
        })?;

        Ok(row.as_ref().map(row_to_reply))
    }

    #[instrument(skip(self))]
    async fn list_replies(&self, post_id: &str) -> Result<Vec<ReplyModel>, AppError> {
        let rows = sqlx::query(
            "SELECT id, post_id, content, author_id, username, created_at, updated_at, \
             edited, is_deleted FROM forum_replies \
             WHERE post_id = $1 AND NOT is_deleted ORDER BY created_at",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, post_id, "Failed to list replies from database");
            AppError::Database(e.to_string())
        })?;

        Ok(rows.iter().map(row_to_reply).collect())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Test helper functions for creating test data
    mod helpers {
        use super::*;

        pub fn create_test_post(author_id: &str, username: &str) -> PostModel {
            PostModel::new(
                "Mechanics past papers".to_string(),
                "Looking for the 2021 set".to_string(),
                author_id.to_string(),
                username.to_string(),
                vec!["papers".to_string()],
            )
        }

        pub fn create_test_reply(post_id: &str, author_id: &str) -> ReplyModel {
            ReplyModel::new(
                post_id.to_string(),
                "I have them, sending a link".to_string(),
                author_id.to_string(),
                "helper".to_string(),
            )
        }
    }

    use helpers::*;

    #[tokio::test]
    async fn test_toggle_pin_twice_is_self_inverse() {
        let repo = InMemoryForumRepository::new();
        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();

        let first = repo.toggle_pin(&post.id, "admin-1").await.unwrap();
        let ToggleOutcome::Toggled(pinned) = first else {
            panic!("expected toggle to succeed");
        };
        assert!(pinned.is_pinned);
        assert_eq!(pinned.last_moderation().unwrap().action, ModAction::Pin);
        assert!(!pinned.last_moderation().unwrap().previous_state);

        let second = repo.toggle_pin(&post.id, "admin-1").await.unwrap();
        let ToggleOutcome::Toggled(unpinned) = second else {
            panic!("expected toggle to succeed");
        };
        assert!(!unpinned.is_pinned);
        // Two records appended, newest last
        assert_eq!(unpinned.moderation_log.len(), 2);
        assert_eq!(unpinned.last_moderation().unwrap().action, ModAction::Unpin);
        assert!(unpinned.last_moderation().unwrap().previous_state);
    }

    #[tokio::test]
    async fn test_toggle_missing_post() {
        let repo = InMemoryForumRepository::new();
        let outcome = repo.toggle_pin("missing", "admin-1").await.unwrap();
        assert!(matches!(outcome, ToggleOutcome::PostNotFound));

        let outcome = repo.toggle_lock("missing", "mod-1").await.unwrap();
        assert!(matches!(outcome, ToggleOutcome::PostNotFound));
    }

    #[tokio::test]
    async fn test_delete_then_restore_round_trips() {
        let repo = InMemoryForumRepository::new();
        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();

        let outcome = repo.soft_delete_post(&post.id, "admin-1").await.unwrap();
        let DeleteOutcome::Deleted(deleted) = outcome else {
            panic!("expected delete to succeed");
        };
        assert!(deleted.is_deleted);
        assert!(deleted.deleted_at.is_some());
        assert_eq!(deleted.deleted_by.as_deref(), Some("admin-1"));

        let outcome = repo.restore_post(&post.id, "mod-1").await.unwrap();
        let RestoreOutcome::Restored(restored) = outcome else {
            panic!("expected restore to succeed");
        };
        assert!(!restored.is_deleted);
        assert!(restored.deleted_at.is_none());
        assert!(restored.deleted_by.is_none());
        assert_eq!(restored.last_moderation().unwrap().action, ModAction::Restore);
    }

    #[tokio::test]
    async fn test_restore_non_deleted_post_fails() {
        let repo = InMemoryForumRepository::new();
        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();

        let outcome = repo.restore_post(&post.id, "mod-1").await.unwrap();
        assert!(matches!(outcome, RestoreOutcome::NotDeleted));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let repo = InMemoryForumRepository::new();
        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();

        repo.soft_delete_post(&post.id, "admin-1").await.unwrap();
        let outcome = repo.soft_delete_post(&post.id, "mod-1").await.unwrap();

        let DeleteOutcome::AlreadyDeleted(unchanged) = outcome else {
            panic!("expected already-deleted outcome");
        };
        // No second record for a no-op delete
        assert_eq!(unchanged.moderation_log.len(), 1);
        assert_eq!(unchanged.deleted_by.as_deref(), Some("admin-1"));
    }

    #[tokio::test]
    async fn test_reply_to_locked_post_rejected_without_count_change() {
        let repo = InMemoryForumRepository::new();
        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();
        repo.toggle_lock(&post.id, "mod-1").await.unwrap();

        let reply = create_test_reply(&post.id, "user-2");
        let outcome = repo.try_create_reply(&reply).await.unwrap();
        assert!(matches!(outcome, CreateReplyOutcome::PostLocked));

        let post = repo.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(post.reply_count, 0);
        assert!(repo.get_reply(&reply.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reply_increments_count_by_exactly_one() {
        let repo = InMemoryForumRepository::new();
        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();

        let reply = create_test_reply(&post.id, "user-2");
        let outcome = repo.try_create_reply(&reply).await.unwrap();

        let CreateReplyOutcome::Created { reply_count, .. } = outcome else {
            panic!("expected reply creation to succeed");
        };
        assert_eq!(reply_count, 1);

        let stored = repo.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.reply_count, 1);
        assert!(repo.get_reply(&reply.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reply_to_missing_or_deleted_post() {
        let repo = InMemoryForumRepository::new();

        let orphan = create_test_reply("missing", "user-2");
        let outcome = repo.try_create_reply(&orphan).await.unwrap();
        assert!(matches!(outcome, CreateReplyOutcome::PostNotFound));

        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();
        repo.soft_delete_post(&post.id, "admin-1").await.unwrap();

        let reply = create_test_reply(&post.id, "user-2");
        let outcome = repo.try_create_reply(&reply).await.unwrap();
        assert!(matches!(outcome, CreateReplyOutcome::PostNotFound));
    }

    #[tokio::test]
    async fn test_delete_reply_decrements_count() {
        let repo = InMemoryForumRepository::new();
        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();

        let reply = create_test_reply(&post.id, "user-2");
        repo.try_create_reply(&reply).await.unwrap();

        let outcome = repo.delete_reply(&post.id, &reply.id).await.unwrap();
        let DeleteReplyOutcome::Deleted { reply_count } = outcome else {
            panic!("expected reply deletion to succeed");
        };
        assert_eq!(reply_count, 0);

        // Deleting again: the reply is already gone
        let outcome = repo.delete_reply(&post.id, &reply.id).await.unwrap();
        assert!(matches!(outcome, DeleteReplyOutcome::ReplyNotFound));
    }

    #[tokio::test]
    async fn test_list_posts_excludes_deleted_and_orders_pinned_first() {
        let repo = InMemoryForumRepository::new();

        let older = create_test_post("user-1", "bob");
        repo.create_post(&older).await.unwrap();
        let mut newer = create_test_post("user-2", "carol");
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        repo.create_post(&newer).await.unwrap();
        let deleted = create_test_post("user-3", "dave");
        repo.create_post(&deleted).await.unwrap();

        repo.toggle_pin(&older.id, "admin-1").await.unwrap();
        repo.soft_delete_post(&deleted.id, "admin-1").await.unwrap();

        let posts = repo.list_posts(0, 20).await.unwrap();
        assert_eq!(posts.len(), 2);
        // Pinned post sorts ahead of the newer unpinned one
        assert_eq!(posts[0].id, older.id);
        assert_eq!(posts[1].id, newer.id);
    }

    #[tokio::test]
    async fn test_list_replies_skips_deleted() {
        let repo = InMemoryForumRepository::new();
        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();

        let first = create_test_reply(&post.id, "user-2");
        let second = create_test_reply(&post.id, "user-3");
        repo.try_create_reply(&first).await.unwrap();
        repo.try_create_reply(&second).await.unwrap();
        repo.delete_reply(&post.id, &first.id).await.unwrap();

        let replies = repo.list_replies(&post.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id, second.id);
    }

    #[tokio::test]
    async fn test_concurrent_toggles_lose_no_updates() {
        use std::sync::Arc;

        let repo = Arc::new(InMemoryForumRepository::new());
        let post = create_test_post("user-1", "bob");
        repo.create_post(&post).await.unwrap();

        let handles = (0..10)
            .map(|i| {
                let repo = Arc::clone(&repo);
                let post_id = post.id.clone();
                tokio::spawn(async move {
                    repo.toggle_lock(&post_id, &format!("mod-{i}")).await
                })
            })
            .collect::<Vec<_>>();

        let results = futures::future::join_all(handles).await;
        for result in results {
            assert!(matches!(
                result.unwrap().unwrap(),
                ToggleOutcome::Toggled(_)
            ));
        }

        // Every toggle landed: ten records, and an even count flips back
        let stored = repo.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.moderation_log.len(), 10);
        assert!(!stored.is_locked);
    }
}

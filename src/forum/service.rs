use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::models::{PostModel, ReplyModel};
use super::permissions::{can_perform_action, within_edit_window, ContentAction};
use super::repository::{
    CreateReplyOutcome, DeleteOutcome, DeleteReplyOutcome, ForumRepository, RestoreOutcome,
    ToggleOutcome,
};
use super::types::{
    CreatePostRequest, CreateReplyRequest, ListPostsParams, PostDetailResponse, PostResponse,
    ReplyResponse, UpdatePostRequest,
};
use crate::auth::AuthClaims;
use crate::shared::AppError;
use crate::user::Role;

const MAX_TITLE_LEN: usize = 200;
const MAX_CONTENT_LEN: usize = 10_000;
const MAX_PER_PAGE: u32 = 100;

/// Service for forum business logic: validation, authorization and the
/// moderation state machine outcomes mapped onto the error taxonomy.
pub struct ForumService {
    repository: Arc<dyn ForumRepository + Send + Sync>,
}

fn validate_post_fields(title: &str, content: &str) -> Result<(), AppError> {
    if title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "Title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    if content.trim().is_empty() {
        return Err(AppError::Validation("Content is required".to_string()));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(AppError::Validation(format!(
            "Content must be at most {MAX_CONTENT_LEN} characters"
        )));
    }
    Ok(())
}

impl ForumService {
    pub fn new(repository: Arc<dyn ForumRepository + Send + Sync>) -> Self {
        Self { repository }
    }

    #[instrument(skip(self, claims, request))]
    pub async fn create_post(
        &self,
        claims: &AuthClaims,
        request: CreatePostRequest,
    ) -> Result<PostResponse, AppError> {
        validate_post_fields(&request.title, &request.content)?;

        let post = PostModel::new(
            request.title.trim().to_string(),
            request.content.trim().to_string(),
            claims.sub.clone(),
            claims.username.clone(),
            request.tags,
        );
        self.repository.create_post(&post).await?;

        info!(post_id = %post.id, username = %post.username, "Post created");
        Ok(PostResponse::from(&post))
    }

    #[instrument(skip(self, params))]
    pub async fn list_posts(&self, params: ListPostsParams) -> Result<Vec<PostResponse>, AppError> {
        let page = params.page.unwrap_or(1).max(1);
        let per_page = params.per_page.unwrap_or(20).clamp(1, MAX_PER_PAGE);
        let offset = page.saturating_sub(1).saturating_mul(per_page);

        let posts = self.repository.list_posts(offset, per_page).await?;
        debug!(count = posts.len(), page, per_page, "Posts listed");
        Ok(posts.iter().map(PostResponse::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn get_post_detail(&self, post_id: &str) -> Result<PostDetailResponse, AppError> {
        let post = self.load_post(post_id).await?;
        if post.is_deleted {
            return Err(AppError::NotFound("Post not found".to_string()));
        }

        let replies = self.repository.list_replies(post_id).await?;
        Ok(PostDetailResponse {
            post: PostResponse::from(&post),
            replies: replies.iter().map(ReplyResponse::from).collect(),
        })
    }

    /// Author edit. Deletion takes precedence over ownership rights, and
    /// the edit window binds every role.
    #[instrument(skip(self, claims, request))]
    pub async fn edit_post(
        &self,
        claims: &AuthClaims,
        post_id: &str,
        request: UpdatePostRequest,
    ) -> Result<PostResponse, AppError> {
        let post = self.load_post(post_id).await?;

        if post.is_deleted {
            return Err(AppError::InvalidState(
                "Post has been deleted".to_string(),
            ));
        }
        if !can_perform_action(ContentAction::Edit, claims.role, &claims.sub, &post.author_id) {
            return Err(AppError::Forbidden(
                "Only the author can edit this post".to_string(),
            ));
        }
        if !within_edit_window(post.created_at) {
            return Err(AppError::InvalidState(
                "The edit window for this post has closed".to_string(),
            ));
        }

        validate_post_fields(&request.title, &request.content)?;

        let updated = self
            .repository
            .update_post_content(
                post_id,
                request.title.trim(),
                request.content.trim(),
                &request.tags,
            )
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

        info!(post_id, username = %claims.username, "Post edited");
        Ok(PostResponse::from(&updated))
    }

    #[instrument(skip(self, claims))]
    pub async fn toggle_pin(
        &self,
        claims: &AuthClaims,
        post_id: &str,
    ) -> Result<PostResponse, AppError> {
        let post = self.load_post(post_id).await?;
        let action = if post.is_pinned {
            ContentAction::Unpin
        } else {
            ContentAction::Pin
        };
        if !can_perform_action(action, claims.role, &claims.sub, &post.author_id) {
            return Err(AppError::Forbidden(
                "Only admins can pin posts".to_string(),
            ));
        }

        match self.repository.toggle_pin(post_id, &claims.sub).await? {
            ToggleOutcome::Toggled(post) => {
                info!(post_id, pinned = post.is_pinned, "Pin toggled");
                Ok(PostResponse::from(&post))
            }
            ToggleOutcome::PostNotFound => {
                Err(AppError::NotFound("Post not found".to_string()))
            }
        }
    }

    #[instrument(skip(self, claims))]
    pub async fn toggle_lock(
        &self,
        claims: &AuthClaims,
        post_id: &str,
    ) -> Result<PostResponse, AppError> {
        let post = self.load_post(post_id).await?;
        let action = if post.is_locked {
            ContentAction::Unlock
        } else {
            ContentAction::Lock
        };
        if !can_perform_action(action, claims.role, &claims.sub, &post.author_id) {
            return Err(AppError::Forbidden(
                "Moderator access required".to_string(),
            ));
        }

        match self.repository.toggle_lock(post_id, &claims.sub).await? {
            ToggleOutcome::Toggled(post) => {
                info!(post_id, locked = post.is_locked, "Lock toggled");
                Ok(PostResponse::from(&post))
            }
            ToggleOutcome::PostNotFound => {
                Err(AppError::NotFound("Post not found".to_string()))
            }
        }
    }

    /// Soft delete by a moderator, an admin, or the author inside the edit
    /// window. Idempotent when the post is already deleted.
    #[instrument(skip(self, claims))]
    pub async fn delete_post(
        &self,
        claims: &AuthClaims,
        post_id: &str,
    ) -> Result<PostResponse, AppError> {
        let post = self.load_post(post_id).await?;

        if !can_perform_action(ContentAction::Delete, claims.role, &claims.sub, &post.author_id) {
            return Err(AppError::Forbidden(
                "You do not have permission to delete this post".to_string(),
            ));
        }
        // The window only binds plain authors; moderation deletes are not
        // time-bound
        if !claims.role.is_at_least(Role::Moderator) && !within_edit_window(post.created_at) {
            return Err(AppError::InvalidState(
                "The edit window for this post has closed".to_string(),
            ));
        }

        match self.repository.soft_delete_post(post_id, &claims.sub).await? {
            DeleteOutcome::Deleted(post) | DeleteOutcome::AlreadyDeleted(post) => {
                info!(post_id, deleted_by = %claims.username, "Post deleted");
                Ok(PostResponse::from(&post))
            }
            DeleteOutcome::PostNotFound => {
                Err(AppError::NotFound("Post not found".to_string()))
            }
        }
    }

    #[instrument(skip(self, claims))]
    pub async fn restore_post(
        &self,
        claims: &AuthClaims,
        post_id: &str,
    ) -> Result<PostResponse, AppError> {
        let post = self.load_post(post_id).await?;

        if !can_perform_action(ContentAction::Restore, claims.role, &claims.sub, &post.author_id)
        {
            return Err(AppError::Forbidden(
                "Moderator access required".to_string(),
            ));
        }

        match self.repository.restore_post(post_id, &claims.sub).await? {
            RestoreOutcome::Restored(post) => {
                info!(post_id, restored_by = %claims.username, "Post restored");
                Ok(PostResponse::from(&post))
            }
            RestoreOutcome::NotDeleted => Err(AppError::InvalidState(
                "Post is not deleted".to_string(),
            )),
            RestoreOutcome::PostNotFound => {
                Err(AppError::NotFound("Post not found".to_string()))
            }
        }
    }

    #[instrument(skip(self, claims, request))]
    pub async fn create_reply(
        &self,
        claims: &AuthClaims,
        post_id: &str,
        request: CreateReplyRequest,
    ) -> Result<ReplyResponse, AppError> {
        if request.content.trim().is_empty() {
            return Err(AppError::Validation(
                "Reply content is required".to_string(),
            ));
        }
        if request.content.chars().count() > MAX_CONTENT_LEN {
            return Err(AppError::Validation(format!(
                "Content must be at most {MAX_CONTENT_LEN} characters"
            )));
        }

        let reply = ReplyModel::new(
            post_id.to_string(),
            request.content.trim().to_string(),
            claims.sub.clone(),
            claims.username.clone(),
        );

        match self.repository.try_create_reply(&reply).await? {
            CreateReplyOutcome::Created { reply, reply_count } => {
                info!(post_id, reply_count, username = %claims.username, "Reply created");
                Ok(ReplyResponse::from(&reply))
            }
            CreateReplyOutcome::PostLocked => {
                Err(AppError::Locked("This post is locked".to_string()))
            }
            CreateReplyOutcome::PostNotFound => {
                Err(AppError::NotFound("Post not found".to_string()))
            }
        }
    }

    /// Deletes a reply and returns the parent's updated reply count
    #[instrument(skip(self, claims))]
    pub async fn delete_reply(
        &self,
        claims: &AuthClaims,
        post_id: &str,
        reply_id: &str,
    ) -> Result<i64, AppError> {
        let reply = self
            .repository
            .get_reply(reply_id)
            .await?
            .filter(|r| r.post_id == post_id && !r.is_deleted)
            .ok_or_else(|| AppError::NotFound("Reply not found".to_string()))?;

        if !can_perform_action(ContentAction::Delete, claims.role, &claims.sub, &reply.author_id)
        {
            return Err(AppError::Forbidden(
                "You do not have permission to delete this reply".to_string(),
            ));
        }
        if !claims.role.is_at_least(Role::Moderator) && !within_edit_window(reply.created_at) {
            return Err(AppError::InvalidState(
                "The edit window for this reply has closed".to_string(),
            ));
        }

        match self.repository.delete_reply(post_id, reply_id).await? {
            DeleteReplyOutcome::Deleted { reply_count } => {
                info!(post_id, reply_id, reply_count, "Reply deleted");
                Ok(reply_count)
            }
            DeleteReplyOutcome::ReplyNotFound => {
                Err(AppError::NotFound("Reply not found".to_string()))
            }
            DeleteReplyOutcome::PostNotFound => {
                Err(AppError::NotFound("Post not found".to_string()))
            }
        }
    }

    async fn load_post(&self, post_id: &str) -> Result<PostModel, AppError> {
        self.repository
            .get_post(post_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenKind;
    use crate::forum::repository::InMemoryForumRepository;
    use chrono::{Duration, Utc};

    fn claims(sub: &str, username: &str, role: Role) -> AuthClaims {
        AuthClaims {
            sub: sub.to_string(),
            username: username.to_string(),
            role,
            kind: TokenKind::Access,
            iat: 0,
            exp: usize::MAX,
        }
    }

    struct TestContext {
        repo: Arc<InMemoryForumRepository>,
        service: ForumService,
    }

    fn setup() -> TestContext {
        let repo = Arc::new(InMemoryForumRepository::new());
        let service = ForumService::new(repo.clone());
        TestContext { repo, service }
    }

    async fn seed_post(ctx: &TestContext, author_id: &str, username: &str) -> PostResponse {
        ctx.service
            .create_post(
                &claims(author_id, username, Role::User),
                CreatePostRequest {
                    title: "Statistics notes".to_string(),
                    content: "Sharing my S1 summary sheet".to_string(),
                    tags: vec!["notes".to_string()],
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_post_validates_fields() {
        let ctx = setup();
        let author = claims("user-1", "bob", Role::User);

        let no_title = ctx
            .service
            .create_post(
                &author,
                CreatePostRequest {
                    title: "  ".to_string(),
                    content: "body".to_string(),
                    tags: vec![],
                },
            )
            .await;
        assert!(matches!(no_title, Err(AppError::Validation(_))));

        let no_content = ctx
            .service
            .create_post(
                &author,
                CreatePostRequest {
                    title: "title".to_string(),
                    content: "".to_string(),
                    tags: vec![],
                },
            )
            .await;
        assert!(matches!(no_content, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_pin_denied_for_moderator() {
        let ctx = setup();
        let post = seed_post(&ctx, "user-1", "bob").await;

        let result = ctx
            .service
            .toggle_pin(&claims("mod-1", "carol", Role::Moderator), &post.id)
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let pinned = ctx
            .service
            .toggle_pin(&claims("admin-1", "eve", Role::Admin), &post.id)
            .await
            .unwrap();
        assert!(pinned.is_pinned);
    }

    #[tokio::test]
    async fn test_lock_requires_moderator() {
        let ctx = setup();
        let post = seed_post(&ctx, "user-1", "bob").await;

        // Even the author cannot lock their own post
        let result = ctx
            .service
            .toggle_lock(&claims("user-1", "bob", Role::User), &post.id)
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let locked = ctx
            .service
            .toggle_lock(&claims("mod-1", "carol", Role::Moderator), &post.id)
            .await
            .unwrap();
        assert!(locked.is_locked);
    }

    #[tokio::test]
    async fn test_reply_to_locked_post_is_403() {
        let ctx = setup();
        let post = seed_post(&ctx, "user-1", "bob").await;
        ctx.service
            .toggle_lock(&claims("mod-1", "carol", Role::Moderator), &post.id)
            .await
            .unwrap();

        let result = ctx
            .service
            .create_reply(
                &claims("user-2", "dave", Role::User),
                &post.id,
                CreateReplyRequest {
                    content: "me too".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Locked(_))));

        let stored = ctx.repo.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.reply_count, 0);
    }

    #[tokio::test]
    async fn test_author_edit_inside_window() {
        let ctx = setup();
        let post = seed_post(&ctx, "user-1", "bob").await;

        let updated = ctx
            .service
            .edit_post(
                &claims("user-1", "bob", Role::User),
                &post.id,
                UpdatePostRequest {
                    title: "Statistics notes v2".to_string(),
                    content: "Now with the M1 sheet too".to_string(),
                    tags: vec![],
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Statistics notes v2");

        // A different plain user cannot edit
        let result = ctx
            .service
            .edit_post(
                &claims("user-2", "dave", Role::User),
                &post.id,
                UpdatePostRequest {
                    title: "hijacked".to_string(),
                    content: "x".to_string(),
                    tags: vec![],
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_edit_window_closes_for_everyone() {
        let ctx = setup();
        let mut post = PostModel::new(
            "Old thread".to_string(),
            "ancient content".to_string(),
            "user-1".to_string(),
            "bob".to_string(),
            vec![],
        );
        post.created_at = Utc::now() - Duration::hours(25);
        ctx.repo.create_post(&post).await.unwrap();

        let request = UpdatePostRequest {
            title: "too late".to_string(),
            content: "x".to_string(),
            tags: vec![],
        };

        let author = ctx
            .service
            .edit_post(&claims("user-1", "bob", Role::User), &post.id, request)
            .await;
        assert!(matches!(author, Err(AppError::InvalidState(_))));

        // Admins are bound by the same window
        let admin = ctx
            .service
            .edit_post(
                &claims("admin-1", "eve", Role::Admin),
                &post.id,
                UpdatePostRequest {
                    title: "still too late".to_string(),
                    content: "x".to_string(),
                    tags: vec![],
                },
            )
            .await;
        assert!(matches!(admin, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_deletion_takes_precedence_over_author_edit() {
        let ctx = setup();
        let post = seed_post(&ctx, "user-1", "bob").await;

        ctx.service
            .delete_post(&claims("admin-1", "eve", Role::Admin), &post.id)
            .await
            .unwrap();

        // Within the window and as the author, yet rejected: deleted wins
        let result = ctx
            .service
            .edit_post(
                &claims("user-1", "bob", Role::User),
                &post.id,
                UpdatePostRequest {
                    title: "edit after delete".to_string(),
                    content: "x".to_string(),
                    tags: vec![],
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_author_delete_bound_by_window() {
        let ctx = setup();
        let mut post = PostModel::new(
            "Old thread".to_string(),
            "ancient content".to_string(),
            "user-1".to_string(),
            "bob".to_string(),
            vec![],
        );
        post.created_at = Utc::now() - Duration::hours(25);
        ctx.repo.create_post(&post).await.unwrap();

        let author = ctx
            .service
            .delete_post(&claims("user-1", "bob", Role::User), &post.id)
            .await;
        assert!(matches!(author, Err(AppError::InvalidState(_))));

        // Moderation deletes are not time-bound
        let moderator = ctx
            .service
            .delete_post(&claims("mod-1", "carol", Role::Moderator), &post.id)
            .await;
        assert!(moderator.is_ok());
    }

    #[tokio::test]
    async fn test_restore_flow_and_authorization() {
        let ctx = setup();
        let post = seed_post(&ctx, "user-1", "bob").await;

        // Restoring a live post is an invalid state transition
        let not_deleted = ctx
            .service
            .restore_post(&claims("mod-1", "carol", Role::Moderator), &post.id)
            .await;
        assert!(matches!(not_deleted, Err(AppError::InvalidState(_))));

        ctx.service
            .delete_post(&claims("mod-1", "carol", Role::Moderator), &post.id)
            .await
            .unwrap();

        // The author cannot restore moderator-deleted content
        let author = ctx
            .service
            .restore_post(&claims("user-1", "bob", Role::User), &post.id)
            .await;
        assert!(matches!(author, Err(AppError::Forbidden(_))));

        let restored = ctx
            .service
            .restore_post(&claims("mod-1", "carol", Role::Moderator), &post.id)
            .await
            .unwrap();
        assert!(!restored.is_deleted);
    }

    #[tokio::test]
    async fn test_deleted_posts_hidden_from_list_and_detail() {
        let ctx = setup();
        let post = seed_post(&ctx, "user-1", "bob").await;

        ctx.service
            .delete_post(&claims("admin-1", "eve", Role::Admin), &post.id)
            .await
            .unwrap();

        let listed = ctx
            .service
            .list_posts(ListPostsParams {
                page: None,
                per_page: None,
            })
            .await
            .unwrap();
        assert!(listed.is_empty());

        let detail = ctx.service.get_post_detail(&post.id).await;
        assert!(matches!(detail, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reply_lifecycle_maintains_count() {
        let ctx = setup();
        let post = seed_post(&ctx, "user-1", "bob").await;

        let reply = ctx
            .service
            .create_reply(
                &claims("user-2", "dave", Role::User),
                &post.id,
                CreateReplyRequest {
                    content: "thanks!".to_string(),
                },
            )
            .await
            .unwrap();

        let detail = ctx.service.get_post_detail(&post.id).await.unwrap();
        assert_eq!(detail.post.reply_count, 1);
        assert_eq!(detail.replies.len(), 1);

        let count = ctx
            .service
            .delete_reply(&claims("user-2", "dave", Role::User), &post.id, &reply.id)
            .await
            .unwrap();
        assert_eq!(count, 0);

        // A third party cannot delete someone else's reply
        let reply2 = ctx
            .service
            .create_reply(
                &claims("user-2", "dave", Role::User),
                &post.id,
                CreateReplyRequest {
                    content: "another".to_string(),
                },
            )
            .await
            .unwrap();
        let denied = ctx
            .service
            .delete_reply(&claims("user-3", "mallory", Role::User), &post.id, &reply2.id)
            .await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_empty_reply_rejected() {
        let ctx = setup();
        let post = seed_post(&ctx, "user-1", "bob").await;

        let result = ctx
            .service
            .create_reply(
                &claims("user-2", "dave", Role::User),
                &post.id,
                CreateReplyRequest {
                    content: "   ".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}

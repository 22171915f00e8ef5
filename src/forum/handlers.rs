use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

use super::service::ForumService;
use super::types::{
    CreatePostRequest, CreateReplyRequest, ListPostsParams, PostDetailResponse, PostResponse,
    ReplyDeletedResponse, ReplyResponse, UpdatePostRequest,
};
use crate::auth::AuthClaims;
use crate::shared::{AppError, AppState};

fn forum_service(state: &AppState) -> ForumService {
    ForumService::new(Arc::clone(&state.forum_repository))
}

/// HTTP handler for listing posts
///
/// GET /forum/posts
/// Soft-deleted posts are excluded; pinned posts sort first
#[instrument(name = "list_posts", skip(state, params))]
pub async fn list_posts(
    State(state): State<AppState>,
    Query(params): Query<ListPostsParams>,
) -> Result<Json<Vec<PostResponse>>, AppError> {
    let posts = forum_service(&state).list_posts(params).await?;
    Ok(Json(posts))
}

/// HTTP handler for creating a post
///
/// POST /forum/posts
#[instrument(name = "create_post", skip(state, claims, request))]
pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Json(request): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<PostResponse>), AppError> {
    let post = forum_service(&state).create_post(&claims, request).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// HTTP handler for fetching one post with its replies
///
/// GET /forum/posts/:id
#[instrument(name = "get_post", skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<Json<PostDetailResponse>, AppError> {
    let detail = forum_service(&state).get_post_detail(&post_id).await?;
    Ok(Json(detail))
}

/// HTTP handler for author edits
///
/// PUT /forum/posts/:id
#[instrument(name = "edit_post", skip(state, claims, request))]
pub async fn edit_post(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(post_id): Path<String>,
    Json(request): Json<UpdatePostRequest>,
) -> Result<Json<PostResponse>, AppError> {
    let post = forum_service(&state)
        .edit_post(&claims, &post_id, request)
        .await?;
    Ok(Json(post))
}

/// HTTP handler for soft-deleting a post
///
/// DELETE /forum/posts/:id
#[instrument(name = "delete_post", skip(state, claims))]
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(post_id): Path<String>,
) -> Result<Json<PostResponse>, AppError> {
    let post = forum_service(&state).delete_post(&claims, &post_id).await?;
    Ok(Json(post))
}

/// HTTP handler for restoring a soft-deleted post
///
/// POST /forum/posts/:id/restore
#[instrument(name = "restore_post", skip(state, claims))]
pub async fn restore_post(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(post_id): Path<String>,
) -> Result<Json<PostResponse>, AppError> {
    let post = forum_service(&state)
        .restore_post(&claims, &post_id)
        .await?;
    Ok(Json(post))
}

/// HTTP handler for toggling a post's pin flag
///
/// POST /forum/posts/:id/pin
#[instrument(name = "toggle_pin", skip(state, claims))]
pub async fn toggle_pin(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(post_id): Path<String>,
) -> Result<Json<PostResponse>, AppError> {
    let post = forum_service(&state).toggle_pin(&claims, &post_id).await?;
    Ok(Json(post))
}

/// HTTP handler for toggling a post's lock flag
///
/// POST /forum/posts/:id/lock
#[instrument(name = "toggle_lock", skip(state, claims))]
pub async fn toggle_lock(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(post_id): Path<String>,
) -> Result<Json<PostResponse>, AppError> {
    let post = forum_service(&state).toggle_lock(&claims, &post_id).await?;
    Ok(Json(post))
}

/// HTTP handler for creating a reply
///
/// POST /forum/posts/:id/replies
/// 403 when the parent post is locked
#[instrument(name = "create_reply", skip(state, claims, request))]
pub async fn create_reply(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(post_id): Path<String>,
    Json(request): Json<CreateReplyRequest>,
) -> Result<(StatusCode, Json<ReplyResponse>), AppError> {
    let reply = forum_service(&state)
        .create_reply(&claims, &post_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

/// HTTP handler for deleting a reply
///
/// DELETE /forum/posts/:id/replies/:reply_id
#[instrument(name = "delete_reply", skip(state, claims))]
pub async fn delete_reply(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path((post_id, reply_id)): Path<(String, String)>,
) -> Result<Json<ReplyDeletedResponse>, AppError> {
    let reply_count = forum_service(&state)
        .delete_reply(&claims, &post_id, &reply_id)
        .await?;
    Ok(Json(ReplyDeletedResponse {
        message: "Reply deleted".to_string(),
        reply_count,
    }))
}

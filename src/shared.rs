use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use crate::auth::token::TokenConfig;
use crate::forum::repository::ForumRepository;
use crate::mailer::Mailer;
use crate::metrics::AuthMetrics;
use crate::papers::{PayloadCipher, SigningConfig, UpstreamCatalog};
use crate::user::repository::UserRepository;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub user_repository: Arc<dyn UserRepository + Send + Sync>,
    pub forum_repository: Arc<dyn ForumRepository + Send + Sync>,
    pub mailer: Arc<dyn Mailer>,
    pub auth_metrics: Arc<AuthMetrics>,
    pub token_config: TokenConfig,
    pub papers_signing: SigningConfig,
    pub papers_cipher: PayloadCipher,
    pub papers_upstream: Arc<dyn UpstreamCatalog>,
    pub require_verification: bool,
    pub cookie_secure: bool,
}

impl AppState {
    /// Wires the state from the environment; repositories, mailer and the
    /// catalog upstream are injected so deployments can swap backends
    pub fn new(
        user_repository: Arc<dyn UserRepository + Send + Sync>,
        forum_repository: Arc<dyn ForumRepository + Send + Sync>,
        mailer: Arc<dyn Mailer>,
        papers_upstream: Arc<dyn UpstreamCatalog>,
    ) -> Self {
        let flag = |name: &str| {
            std::env::var(name)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };

        Self {
            user_repository,
            forum_repository,
            mailer,
            auth_metrics: Arc::new(AuthMetrics::new()),
            token_config: TokenConfig::new(),
            papers_signing: SigningConfig::new(),
            papers_cipher: PayloadCipher::new(),
            papers_upstream,
            require_verification: flag("REQUIRE_EMAIL_VERIFICATION"),
            cookie_secure: flag("COOKIE_SECURE"),
        }
    }
}

/// Closed error taxonomy for the whole service. Driver and upstream errors
/// are translated into this at the data-access boundary; nothing else
/// reaches the handlers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Moderation state violation: the parent post is locked
    #[error("{0}")]
    Locked(String),

    /// Invalid state transition (restore of a live post, edit of a
    /// deleted one, expired edit window)
    #[error("{0}")]
    InvalidState(String),

    /// Database failure. The detail is logged server-side only
    #[error("Service temporarily unavailable")]
    Database(String),

    /// Upstream catalog service failure
    #[error("{0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Locked(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::InvalidState(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Database(detail) => {
                // Never leak driver detail to the client
                error!(detail = %detail, "Database error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable".to_string(),
                )
            }
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

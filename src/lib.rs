// Library crate for the studyhall backend
// This file exposes the public API for integration tests

pub mod auth;
pub mod forum;
pub mod mailer;
pub mod metrics;
pub mod papers;
pub mod router;
pub mod shared;
pub mod user;

// Re-export commonly used types for easier access in tests
pub use auth::{AuthClaims, TokenKind};
pub use forum::{ForumRepository, PostModel, ReplyModel};
pub use router::build_router;
pub use shared::{AppError, AppState};
pub use user::{Role, UserModel, UserRepository};

// Public API - what other modules can use
pub use models::{ModAction, ModerationRecord, PostModel, ReplyModel};
pub use permissions::{can_perform_action, within_edit_window, ContentAction};
pub use repository::ForumRepository;

// Internal modules
pub mod handlers;
pub mod models;
pub mod permissions;
pub mod repository;
pub mod service;
pub mod types;

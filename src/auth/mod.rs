// Public API - what other modules can use
pub use middleware::require_auth;
pub use types::{AuthClaims, TokenKind};

// Internal modules
pub mod cookies;
pub mod handlers;
mod middleware;
pub mod service;
pub mod token;
pub mod types;

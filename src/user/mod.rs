// Public API - what other modules can use
pub use models::{Role, UserModel};
pub use repository::UserRepository;

// Internal modules
pub mod models;
pub mod repository;

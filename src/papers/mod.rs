// Public API - what other modules can use
pub use crypto::PayloadCipher;
pub use signing::{SignedRequest, SigningConfig};
pub use upstream::{HttpUpstreamCatalog, StaticUpstreamCatalog, UpstreamCatalog};

// Internal modules
pub mod crypto;
pub mod handlers;
pub mod signing;
pub mod upstream;

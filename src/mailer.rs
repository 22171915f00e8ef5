use async_trait::async_trait;
use tracing::{info, instrument};

/// Outbound email seam. Delivery is an external concern; the service layer
/// only depends on this trait.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &str, token: &str);
    async fn send_password_reset(&self, email: &str, token: &str);
}

/// Logs deliveries instead of sending them. Used whenever SMTP credentials
/// are not configured, and in every test.
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    #[instrument(skip(self, token))]
    async fn send_verification(&self, email: &str, token: &str) {
        info!(
            recipient = %email,
            token_length = token.len(),
            "Verification email (console fallback)"
        );
    }

    #[instrument(skip(self, token))]
    async fn send_password_reset(&self, email: &str, token: &str) {
        info!(
            recipient = %email,
            token_length = token.len(),
            "Password reset email (console fallback)"
        );
    }
}

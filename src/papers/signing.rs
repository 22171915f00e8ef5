use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::shared::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Default freshness window for signed requests, in seconds
const DEFAULT_MAX_SKEW_SECS: i64 = 300;

/// Signed-request triple passed between the edge and this service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRequest {
    pub token: String,
    pub timestamp: i64,
    pub signature: String,
}

/// Configuration for signing and validating papers-proxy requests
#[derive(Clone)]
pub struct SigningConfig {
    secret: String,
    pub max_skew_secs: i64,
}

impl SigningConfig {
    pub fn new() -> Self {
        let max_skew_secs = std::env::var("PAPERS_MAX_SKEW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_SKEW_SECS);

        Self {
            secret: std::env::var("PAPERS_SIGNING_SECRET")
                .unwrap_or_else(|_| "dev-papers-signing-secret".to_string()),
            max_skew_secs,
        }
    }

    pub fn with_secret(secret: &str, max_skew_secs: i64) -> Self {
        Self {
            secret: secret.to_string(),
            max_skew_secs,
        }
    }

    /// Produces a fresh `{token, timestamp, signature}` triple
    #[instrument(skip(self))]
    pub fn create_signed_request(&self) -> Result<SignedRequest, AppError> {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        let token = hex::encode(bytes);
        let timestamp = Utc::now().timestamp();
        let signature = self.sign(&token, timestamp)?;

        Ok(SignedRequest {
            token,
            timestamp,
            signature,
        })
    }

    fn sign(&self, token: &str, timestamp: i64) -> Result<String, AppError> {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|_| AppError::Internal)?;
        mac.update(format!("{token}.{timestamp}").as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Recomputes the MAC (constant-time compare) and enforces the
    /// freshness window. Fails closed on any mismatch or parse failure.
    #[instrument(skip(self, token, signature))]
    pub fn validate(&self, token: &str, timestamp: i64, signature: &str) -> bool {
        let now = Utc::now().timestamp();
        if (now - timestamp).abs() > self.max_skew_secs {
            debug!(timestamp, now, "Signed request outside freshness window");
            return false;
        }

        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return false;
        };
        mac.update(format!("{token}.{timestamp}").as_bytes());

        let Ok(signature_bytes) = hex::decode(signature) else {
            debug!("Signed request carried a non-hex signature");
            return false;
        };

        mac.verify_slice(&signature_bytes).is_ok()
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self::new()
    }
}

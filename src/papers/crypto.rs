use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::shared::AppError;

const NONCE_LEN: usize = 24;

/// Authenticated encryption for catalog payloads crossing the edge/server
/// boundary. Output format: base64(nonce || ciphertext).
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: XChaCha20Poly1305,
}

impl PayloadCipher {
    pub fn new() -> Self {
        let secret = std::env::var("PAPERS_ENCRYPTION_SECRET")
            .unwrap_or_else(|_| "dev-papers-encryption-secret".to_string());
        Self::from_secret(&secret)
    }

    /// Derives the cipher key as SHA-256 of the configured secret
    pub fn from_secret(secret: &str) -> Self {
        let key_bytes = Sha256::digest(secret.as_bytes());
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key_bytes)),
        }
    }

    pub fn encrypt_value(&self, value: &serde_json::Value) -> Result<String, AppError> {
        let plaintext = serde_json::to_vec(value).map_err(|_| AppError::Internal)?;

        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| AppError::Internal)?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt_value(&self, payload: &str) -> Result<serde_json::Value, AppError> {
        let malformed = || AppError::Validation("Malformed encrypted payload".to_string());

        let bytes = BASE64.decode(payload).map_err(|_| malformed())?;
        if bytes.len() <= NONCE_LEN {
            return Err(malformed());
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                debug!("Payload failed authenticated decryption");
                malformed()
            })?;

        serde_json::from_slice(&plaintext).map_err(|_| malformed())
    }
}

impl Default for PayloadCipher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let cipher = PayloadCipher::from_secret("edge-secret");
        let catalog = json!({
            "subjects": ["maths", "physics"],
            "papers": [{"year": 2019, "session": "june"}]
        });

        let payload = cipher.encrypt_value(&catalog).unwrap();
        assert_ne!(payload, catalog.to_string());

        let decrypted = cipher.decrypt_value(&payload).unwrap();
        assert_eq!(decrypted, catalog);
    }

    #[test]
    fn test_each_encryption_uses_a_fresh_nonce() {
        let cipher = PayloadCipher::from_secret("edge-secret");
        let value = json!({"a": 1});

        let first = cipher.encrypt_value(&value).unwrap();
        let second = cipher.encrypt_value(&value).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let encryptor = PayloadCipher::from_secret("secret-a");
        let decryptor = PayloadCipher::from_secret("secret-b");

        let payload = encryptor.encrypt_value(&json!({"a": 1})).unwrap();
        assert!(matches!(
            decryptor.decrypt_value(&payload),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let cipher = PayloadCipher::from_secret("edge-secret");
        let payload = cipher.encrypt_value(&json!({"a": 1})).unwrap();

        let mut bytes = BASE64.decode(&payload).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);

        assert!(cipher.decrypt_value(&tampered).is_err());
    }

    #[test]
    fn test_garbage_payload_fails_cleanly() {
        let cipher = PayloadCipher::from_secret("edge-secret");

        assert!(cipher.decrypt_value("not base64 at all!!!").is_err());
        assert!(cipher.decrypt_value("dG9vLXNob3J0").is_err());
    }
}

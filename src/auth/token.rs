use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, instrument};

use super::types::{AuthClaims, TokenKind, TokenPair};
use crate::shared::AppError;
use crate::user::UserModel;

/// Internal verification failure. Callers outside this module only ever see
/// the uniform `AppError::Unauthorized` so an attacker cannot distinguish a
/// tampered token from an expired one.
#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Invalid,
}

impl From<TokenError> for AppError {
    fn from(_: TokenError) -> Self {
        AppError::Unauthorized("Invalid or expired token".to_string())
    }
}

/// Configuration for signing and verifying session tokens
#[derive(Clone)]
pub struct TokenConfig {
    secret: String,
    pub access_hours: i64,
    pub remember_me_days: i64,
    pub refresh_days: i64,
}

impl TokenConfig {
    pub fn new() -> Self {
        let access_hours = std::env::var("ACCESS_TOKEN_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(24);
        let remember_me_days = std::env::var("REMEMBER_ME_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let refresh_days = std::env::var("REFRESH_TOKEN_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(90);

        Self {
            secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-in-production".to_string()),
            access_hours,
            remember_me_days,
            refresh_days,
        }
    }

    /// Builds a config with an explicit secret, bypassing the environment
    pub fn with_secret(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            access_hours: 24,
            remember_me_days: 30,
            refresh_days: 90,
        }
    }

    pub fn access_max_age_secs(&self, remember_me: bool) -> i64 {
        if remember_me {
            self.remember_me_days * 24 * 3600
        } else {
            self.access_hours * 3600
        }
    }

    pub fn refresh_max_age_secs(&self) -> i64 {
        self.refresh_days * 24 * 3600
    }

    /// Mints the access + refresh pair for a freshly authenticated user
    #[instrument(skip(self, user))]
    pub fn issue_pair(&self, user: &UserModel, remember_me: bool) -> Result<TokenPair, AppError> {
        let access = self.issue_access(user, remember_me)?;
        let refresh = self.sign(
            user,
            TokenKind::Refresh,
            Duration::seconds(self.refresh_max_age_secs()),
        )?;

        debug!(
            username = %user.username,
            remember_me,
            "Issued access/refresh token pair"
        );

        Ok(TokenPair { access, refresh })
    }

    /// Mints a standalone access token (login and refresh paths)
    pub fn issue_access(&self, user: &UserModel, remember_me: bool) -> Result<String, AppError> {
        self.sign(
            user,
            TokenKind::Access,
            Duration::seconds(self.access_max_age_secs(remember_me)),
        )
    }

    fn sign(
        &self,
        user: &UserModel,
        kind: TokenKind,
        lifetime: Duration,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = AuthClaims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            kind,
            iat: now.timestamp() as usize,
            exp: (now + lifetime).timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
        .map_err(|e| {
            debug!(error = %e, kind = %kind, "Failed to encode token");
            AppError::Internal
        })
    }

    /// Decodes and checks signature, expiry and token kind.
    ///
    /// Expiry uses zero leeway so a past `exp` always fails.
    #[instrument(skip(self, token))]
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<AuthClaims, TokenError> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let claims = decode::<AuthClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => {
                debug!("Token rejected: expired");
                TokenError::Expired
            }
            _ => {
                debug!(error = %e, "Token rejected: invalid");
                TokenError::Invalid
            }
        })?;

        if claims.kind != expected {
            debug!(got = %claims.kind, want = %expected, "Token rejected: wrong kind");
            return Err(TokenError::Invalid);
        }

        Ok(claims)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new()
    }
}

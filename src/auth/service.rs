use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use super::token::TokenConfig;
use super::types::{
    ForgotPasswordRequest, GenericResponse, LoginRequest, RegisterRequest, ResetPasswordRequest,
    TokenKind, TokenPair, UserResponse, VerifyEmailRequest,
};
use crate::mailer::Mailer;
use crate::metrics::AuthMetrics;
use crate::shared::AppError;
use crate::user::{UserModel, UserRepository};

const MAX_FAILED_LOGINS: i32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const VERIFICATION_TOKEN_HOURS: i64 = 24;
const RESET_TOKEN_HOURS: i64 = 1;

/// Single message for every credential failure. Responses must not reveal
/// whether the username exists or which part of the credentials was wrong.
const INVALID_CREDENTIALS: &str = "Invalid username or password";
const RESET_SENT: &str = "If an account exists for that address, a password reset email has been sent";

/// Service for account lifecycle and credential verification
pub struct AuthService {
    users: Arc<dyn UserRepository + Send + Sync>,
    tokens: TokenConfig,
    mailer: Arc<dyn Mailer>,
    metrics: Arc<AuthMetrics>,
    require_verification: bool,
}

/// Generates a one-time token: the raw value is emailed, only its SHA-256
/// is stored.
fn one_time_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    let raw = hex::encode(bytes);
    let hash = hex::encode(Sha256::digest(raw.as_bytes()));
    (raw, hash)
}

fn validate_username(username: &str) -> Result<(), AppError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(AppError::Validation(
            "Username must be between 3 and 32 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::Validation(
            "Username may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let valid = email.len() <= 254
        && email.contains('@')
        && email.rsplit('@').next().map(|d| d.contains('.')).unwrap_or(false);
    if !valid {
        return Err(AppError::Validation(
            "A valid email address is required".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository + Send + Sync>,
        tokens: TokenConfig,
        mailer: Arc<dyn Mailer>,
        metrics: Arc<AuthMetrics>,
        require_verification: bool,
    ) -> Self {
        Self {
            users,
            tokens,
            mailer,
            metrics,
            require_verification,
        }
    }

    /// Creates a new unverified account and emails its verification token
    #[instrument(skip(self, request))]
    pub async fn register(&self, request: RegisterRequest) -> Result<UserResponse, AppError> {
        let username = request.username.trim().to_string();
        let email = request.email.trim().to_lowercase();

        validate_username(&username)?;
        validate_email(&email)?;
        validate_password(&request.password)?;

        let password_hash = bcrypt::hash(&request.password, bcrypt::DEFAULT_COST).map_err(|e| {
            warn!(error = %e, "Password hashing failed");
            AppError::Internal
        })?;

        let (raw_token, token_hash) = one_time_token();
        let mut user = UserModel::new(username, email.clone(), password_hash);
        user.verification_token = Some(token_hash);
        user.verification_expires = Some(Utc::now() + Duration::hours(VERIFICATION_TOKEN_HOURS));

        self.users.create_user(&user).await?;
        self.mailer.send_verification(&email, &raw_token).await;

        info!(username = %user.username, "User registered");
        Ok(UserResponse::from(&user))
    }

    /// Verifies credentials and mints the token pair.
    ///
    /// Unknown usernames and wrong passwords produce byte-identical failures.
    #[instrument(skip(self, request))]
    pub async fn login(
        &self,
        request: LoginRequest,
    ) -> Result<(UserResponse, TokenPair, bool), AppError> {
        let user = match self.users.get_by_username(request.username.trim()).await? {
            Some(user) => user,
            None => {
                self.metrics.record_login_failure();
                return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
            }
        };

        if user.is_locked_out() {
            warn!(username = %user.username, "Login attempt against locked account");
            return Err(AppError::Forbidden(
                "Account temporarily locked. Try again later".to_string(),
            ));
        }

        let password_ok = bcrypt::verify(&request.password, &user.password_hash).map_err(|e| {
            warn!(error = %e, "Stored password hash is unreadable");
            AppError::Internal
        })?;

        if !password_ok {
            self.metrics.record_login_failure();
            self.record_failed_login(user).await?;
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        if self.require_verification && !user.verified {
            return Err(AppError::Forbidden(
                "Please verify your email address before logging in".to_string(),
            ));
        }

        let user = self.clear_lockout(user).await?;
        let pair = self.tokens.issue_pair(&user, request.remember_me)?;
        self.metrics.record_login();

        info!(username = %user.username, "Login successful");
        Ok((UserResponse::from(&user), pair, request.remember_me))
    }

    async fn record_failed_login(&self, mut user: UserModel) -> Result<(), AppError> {
        user.failed_logins += 1;
        if user.failed_logins >= MAX_FAILED_LOGINS {
            user.locked_until = Some(Utc::now() + Duration::minutes(LOCKOUT_MINUTES));
            user.failed_logins = 0;
            warn!(username = %user.username, "Account locked after repeated failures");
        }
        self.users.update_user(&user).await
    }

    async fn clear_lockout(&self, mut user: UserModel) -> Result<UserModel, AppError> {
        if user.failed_logins > 0 || user.locked_until.is_some() {
            user.failed_logins = 0;
            user.locked_until = None;
            self.users.update_user(&user).await?;
        }
        Ok(user)
    }

    /// Rotates the access token off a valid refresh token
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<(UserResponse, String), AppError> {
        let claims = self.tokens.verify(refresh_token, TokenKind::Refresh)?;

        // The identity must still exist; a deleted account cannot refresh
        let user = self
            .users
            .get_user(&claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))?;

        let access = self.tokens.issue_access(&user, false)?;
        info!(username = %user.username, "Access token refreshed");
        Ok((UserResponse::from(&user), access))
    }

    /// Resolves the current identity. Never fails: an absent or invalid
    /// token is simply "not logged in".
    #[instrument(skip(self, access_token))]
    pub async fn me(&self, access_token: Option<&str>) -> Option<UserResponse> {
        let token = access_token?;
        let claims = self.tokens.verify(token, TokenKind::Access).ok()?;

        match self.users.get_user(&claims.sub).await {
            Ok(Some(user)) => Some(UserResponse::from(&user)),
            _ => None,
        }
    }

    /// Consumes an email-verification token
    #[instrument(skip(self, request))]
    pub async fn verify_email(&self, request: VerifyEmailRequest) -> Result<UserResponse, AppError> {
        let token_hash = hex::encode(Sha256::digest(request.token.trim().as_bytes()));
        let invalid = || AppError::Validation("Invalid or expired verification token".to_string());

        let mut user = self
            .users
            .get_by_verification_token(&token_hash)
            .await?
            .ok_or_else(invalid)?;

        if user.verification_token_expired() {
            return Err(invalid());
        }

        user.verified = true;
        user.verification_token = None;
        user.verification_expires = None;
        self.users.update_user(&user).await?;

        info!(username = %user.username, "Email verified");
        Ok(UserResponse::from(&user))
    }

    /// Issues a reset token when the account exists. The response is the
    /// same either way so addresses cannot be enumerated.
    #[instrument(skip(self, request))]
    pub async fn forgot_password(
        &self,
        request: ForgotPasswordRequest,
    ) -> Result<GenericResponse, AppError> {
        let email = request.email.trim().to_lowercase();

        if let Some(mut user) = self.users.get_by_email(&email).await? {
            let (raw_token, token_hash) = one_time_token();
            user.reset_token = Some(token_hash);
            user.reset_expires = Some(Utc::now() + Duration::hours(RESET_TOKEN_HOURS));
            self.users.update_user(&user).await?;
            self.mailer.send_password_reset(&email, &raw_token).await;
            info!(username = %user.username, "Password reset token issued");
        }

        Ok(GenericResponse {
            message: RESET_SENT.to_string(),
        })
    }

    /// Consumes a reset token and installs the new password
    #[instrument(skip(self, request))]
    pub async fn reset_password(
        &self,
        request: ResetPasswordRequest,
    ) -> Result<GenericResponse, AppError> {
        validate_password(&request.password)?;

        let token_hash = hex::encode(Sha256::digest(request.token.trim().as_bytes()));
        let invalid = || AppError::Validation("Invalid or expired reset token".to_string());

        let mut user = self
            .users
            .get_by_reset_token(&token_hash)
            .await?
            .ok_or_else(invalid)?;

        if user.reset_token_expired() {
            return Err(invalid());
        }

        user.password_hash = bcrypt::hash(&request.password, bcrypt::DEFAULT_COST).map_err(|e| {
            warn!(error = %e, "Password hashing failed");
            AppError::Internal
        })?;
        user.reset_token = None;
        user.reset_expires = None;
        user.failed_logins = 0;
        user.locked_until = None;
        self.users.update_user(&user).await?;

        info!(username = %user.username, "Password reset completed");
        Ok(GenericResponse {
            message: "Password has been reset".to_string(),
        })
    }
}

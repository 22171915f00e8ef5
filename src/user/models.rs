use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Account role, totally ordered: admin > moderator > user
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Hash,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn rank(&self) -> u8 {
        match self {
            Role::User => 1,
            Role::Moderator => 2,
            Role::Admin => 3,
        }
    }

    pub fn is_at_least(&self, other: Role) -> bool {
        self.rank() >= other.rank()
    }
}

/// Database model for the users table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserModel {
    pub id: String, // UUID v4 as string
    pub username: String,
    pub email: String,
    pub password_hash: String, // bcrypt, never serialized into responses
    pub role: Role,
    pub verified: bool,
    pub verification_token: Option<String>, // SHA-256 of the emailed token
    pub verification_expires: Option<DateTime<Utc>>,
    pub reset_token: Option<String>, // SHA-256 of the emailed token
    pub reset_expires: Option<DateTime<Utc>>,
    pub failed_logins: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserModel {
    /// Creates a fresh, unverified account with the default role
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username,
            email,
            password_hash,
            role: Role::User,
            verified: false,
            verification_token: None,
            verification_expires: None,
            reset_token: None,
            reset_expires: None,
            failed_logins: 0,
            locked_until: None,
            created_at: Utc::now(),
        }
    }

    /// Whether failed logins have locked this account out right now
    pub fn is_locked_out(&self) -> bool {
        self.locked_until.map(|t| t > Utc::now()).unwrap_or(false)
    }

    pub fn verification_token_expired(&self) -> bool {
        self.verification_expires
            .map(|t| t < Utc::now())
            .unwrap_or(true)
    }

    pub fn reset_token_expired(&self) -> bool {
        self.reset_expires.map(|t| t < Utc::now()).unwrap_or(true)
    }
}

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::models::{Role, UserModel};
use crate::shared::AppError;

/// Trait for user account storage operations
#[async_trait]
pub trait UserRepository {
    /// Fails with `AppError::Conflict` when the username or email is taken
    async fn create_user(&self, user: &UserModel) -> Result<(), AppError>;
    async fn get_user(&self, user_id: &str) -> Result<Option<UserModel>, AppError>;
    async fn get_by_username(&self, username: &str) -> Result<Option<UserModel>, AppError>;
    async fn get_by_email(&self, email: &str) -> Result<Option<UserModel>, AppError>;
    async fn get_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<UserModel>, AppError>;
    async fn get_by_reset_token(&self, token_hash: &str) -> Result<Option<UserModel>, AppError>;
    async fn update_user(&self, user: &UserModel) -> Result<(), AppError>;
}

/// In-memory implementation of UserRepository for development and testing
pub struct InMemoryUserRepository {
    users: Mutex<HashMap<String, UserModel>>,
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    #[instrument(skip(self, user))]
    async fn create_user(&self, user: &UserModel) -> Result<(), AppError> {
        debug!(user_id = %user.id, username = %user.username, "Creating user in memory");

        let mut users = self.users.lock().unwrap();
        if users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            warn!(username = %user.username, "Username or email already taken");
            return Err(AppError::Conflict(
                "Username or email is already in use".to_string(),
            ));
        }
        users.insert(user.id.clone(), user.clone());

        debug!(user_id = %user.id, "User created successfully in memory");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_user(&self, user_id: &str) -> Result<Option<UserModel>, AppError> {
        let users = self.users.lock().unwrap();
        Ok(users.get(user_id).cloned())
    }

    #[instrument(skip(self))]
    async fn get_by_username(&self, username: &str) -> Result<Option<UserModel>, AppError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    #[instrument(skip(self))]
    async fn get_by_email(&self, email: &str) -> Result<Option<UserModel>, AppError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    #[instrument(skip(self, token_hash))]
    async fn get_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<UserModel>, AppError> {
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .find(|u| u.verification_token.as_deref() == Some(token_hash))
            .cloned())
    }

    #[instrument(skip(self, token_hash))]
    async fn get_by_reset_token(&self, token_hash: &str) -> Result<Option<UserModel>, AppError> {
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .find(|u| u.reset_token.as_deref() == Some(token_hash))
            .cloned())
    }

    #[instrument(skip(self, user))]
    async fn update_user(&self, user: &UserModel) -> Result<(), AppError> {
        let mut users = self.users.lock().unwrap();
        if !users.contains_key(&user.id) {
            warn!(user_id = %user.id, "User not found for update in memory");
            return Err(AppError::NotFound("User not found".to_string()));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }
}

/// PostgreSQL implementation of user repository
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &PgRow) -> Result<UserModel, AppError> {
    let role: String = row.get("role");
    let role: Role = role.parse().map_err(|_| {
        warn!(value = %role, "Unrecognized role value in users table");
        AppError::Internal
    })?;

    Ok(UserModel {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role,
        verified: row.get("verified"),
        verification_token: row.get("verification_token"),
        verification_expires: row.get("verification_expires"),
        reset_token: row.get("reset_token"),
        reset_expires: row.get("reset_expires"),
        failed_logins: row.get("failed_logins"),
        locked_until: row.get("locked_until"),
        created_at: row.get("created_at"),
    })
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, verified, \
     verification_token, verification_expires, reset_token, reset_expires, \
     failed_logins, locked_until, created_at";

impl PostgresUserRepository {
    async fn fetch_one_by(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<UserModel>, AppError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, column, "Failed to fetch user from database");
                AppError::Database(e.to_string())
            })?;

        row.as_ref().map(row_to_user).transpose()
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    #[instrument(skip(self, user))]
    async fn create_user(&self, user: &UserModel) -> Result<(), AppError> {
        debug!(user_id = %user.id, username = %user.username, "Creating user in database");

        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role, verified, \
             verification_token, verification_expires, reset_token, reset_expires, \
             failed_logins, locked_until, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(user.verified)
        .bind(&user.verification_token)
        .bind(user.verification_expires)
        .bind(&user.reset_token)
        .bind(user.reset_expires)
        .bind(user.failed_logins)
        .bind(user.locked_until)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            // Translate the driver's unique-violation into the closed taxonomy
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict("Username or email is already in use".to_string())
            }
            _ => {
                warn!(error = %e, "Failed to create user in database");
                AppError::Database(e.to_string())
            }
        })?;

        debug!(user_id = %user.id, "User created successfully in database");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_user(&self, user_id: &str) -> Result<Option<UserModel>, AppError> {
        self.fetch_one_by("id", user_id).await
    }

    #[instrument(skip(self))]
    async fn get_by_username(&self, username: &str) -> Result<Option<UserModel>, AppError> {
        self.fetch_one_by("username", username).await
    }

    #[instrument(skip(self))]
    async fn get_by_email(&self, email: &str) -> Result<Option<UserModel>, AppError> {
        self.fetch_one_by("email", email).await
    }

    #[instrument(skip(self, token_hash))]
    async fn get_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<UserModel>, AppError> {
        self.fetch_one_by("verification_token", token_hash).await
    }

    #[instrument(skip(self, token_hash))]
    async fn get_by_reset_token(&self, token_hash: &str) -> Result<Option<UserModel>, AppError> {
        self.fetch_one_by("reset_token", token_hash).await
    }

    #[instrument(skip(self, user))]
    async fn update_user(&self, user: &UserModel) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE users SET username = $2, email = $3, password_hash = $4, role = $5, \
             verified = $6, verification_token = $7, verification_expires = $8, \
             reset_token = $9, reset_expires = $10, failed_logins = $11, locked_until = $12 \
             WHERE id = $1",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(user.verified)
        .bind(&user.verification_token)
        .bind(user.verification_expires)
        .bind(&user.reset_token)
        .bind(user.reset_expires)
        .bind(user.failed_logins)
        .bind(user.locked_until)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, user_id = %user.id, "Failed to update user in database");
            AppError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            warn!(user_id = %user.id, "User not found for update");
            return Err(AppError::NotFound("User not found".to_string()));
        }

        Ok(())
    }
}

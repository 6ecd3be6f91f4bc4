use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{NewUser, User};
use tokio_postgres::Row;

use crate::RepositoryError;

const USER_COLUMNS: &str =
    "id, name, email, password_hash, email_verified_at, verification_token, created_at, updated_at";

/// # UsersRepository
///
/// Storage of customer accounts. Emails are stored lower-cased by the caller.
#[async_trait]
pub trait UsersRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    async fn find_by_verification_token(&self, token: &str)
    -> Result<Option<User>, RepositoryError>;
    async fn create(&self, user: &NewUser) -> Result<User, RepositoryError>;
    /// Replaces the pending verification token.
    async fn set_verification_token(&self, id: i64, token: &str) -> Result<User, RepositoryError>;
    /// Stamps `email_verified_at` and clears the token.
    async fn mark_email_verified(&self, id: i64) -> Result<User, RepositoryError>;
}

/// PostgreSQL implementation of the UsersRepository trait.
pub struct PgUsersRepository {
    pool: Pool,
}

impl PgUsersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, filter: &str, value: &str) -> Result<Option<User>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} = $1");
        let row = client.query_opt(sql.as_str(), &[&value]).await?;
        Ok(row.as_ref().map(user_from_row))
    }
}

#[async_trait]
impl UsersRepository for PgUsersRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        self.find_one("email", email).await
    }

    async fn find_by_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<User>, RepositoryError> {
        self.find_one("verification_token", token).await
    }

    async fn create(&self, user: &NewUser) -> Result<User, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO users (name, email, password_hash, verification_token)
             VALUES ($1, $2, $3, $4)
             RETURNING {USER_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &user.name,
                    &user.email,
                    &user.password_hash,
                    &user.verification_token,
                ],
            )
            .await?;
        Ok(user_from_row(&row))
    }

    async fn set_verification_token(&self, id: i64, token: &str) -> Result<User, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE users SET verification_token = $2, updated_at = now()
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        );
        let row = client.query_opt(sql.as_str(), &[&id, &token]).await?;
        row.as_ref().map(user_from_row).ok_or(RepositoryError::NotFound)
    }

    async fn mark_email_verified(&self, id: i64) -> Result<User, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE users
             SET email_verified_at = now(), verification_token = NULL, updated_at = now()
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        );
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        row.as_ref().map(user_from_row).ok_or(RepositoryError::NotFound)
    }
}

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        email_verified_at: row.get("email_verified_at"),
        verification_token: row.get("verification_token"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

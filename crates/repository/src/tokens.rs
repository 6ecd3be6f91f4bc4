use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::AccessToken;
use tokio_postgres::Row;

use crate::RepositoryError;

/// Personal access tokens issued at login.
#[async_trait]
pub trait TokensRepository: Send + Sync {
    async fn create(
        &self,
        user_id: i64,
        name: &str,
        token_hash: &str,
    ) -> Result<AccessToken, RepositoryError>;
    async fn find(&self, id: i64) -> Result<Option<AccessToken>, RepositoryError>;
    /// Records the current time as `last_used_at`.
    async fn touch(&self, id: i64) -> Result<(), RepositoryError>;
    async fn delete(&self, id: i64) -> Result<bool, RepositoryError>;
    /// Revokes every token of the user, returning how many were removed.
    async fn delete_for_user(&self, user_id: i64) -> Result<u64, RepositoryError>;
}

pub struct PgTokensRepository {
    pool: Pool,
}

impl PgTokensRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokensRepository for PgTokensRepository {
    async fn create(
        &self,
        user_id: i64,
        name: &str,
        token_hash: &str,
    ) -> Result<AccessToken, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO access_tokens (user_id, name, token_hash)
                VALUES ($1, $2, $3)
                RETURNING id, user_id, name, token_hash, last_used_at, created_at
                "#,
                &[&user_id, &name, &token_hash],
            )
            .await?;
        Ok(token_from_row(&row))
    }

    async fn find(&self, id: i64) -> Result<Option<AccessToken>, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, user_id, name, token_hash, last_used_at, created_at
                FROM access_tokens WHERE id = $1
                "#,
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(token_from_row))
    }

    async fn touch(&self, id: i64) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE access_tokens SET last_used_at = now() WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM access_tokens WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_for_user(&self, user_id: i64) -> Result<u64, RepositoryError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM access_tokens WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(deleted)
    }
}

fn token_from_row(row: &Row) -> AccessToken {
    AccessToken {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        token_hash: row.get("token_hash"),
        last_used_at: row.get("last_used_at"),
        created_at: row.get("created_at"),
    }
}

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{AuditEvent, AuditLog, NewAuditLog};
use tokio_postgres::Row;

use crate::RepositoryError;

/// Append-only audit trail.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert(&self, entry: &NewAuditLog) -> Result<(), RepositoryError>;
    /// Entries of one record, oldest first.
    async fn for_model(
        &self,
        model_type: &str,
        model_id: i64,
    ) -> Result<Vec<AuditLog>, RepositoryError>;
}

pub struct PgAuditRepository {
    pool: Pool,
}

impl PgAuditRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn insert(&self, entry: &NewAuditLog) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO audit_logs (
                    model_type, model_id, user_id, event, old_values, new_values,
                    ip_address, user_agent, url, trace_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
                &[
                    &entry.model_type,
                    &entry.model_id,
                    &entry.user_id,
                    &entry.event.as_str(),
                    &entry.old_values,
                    &entry.new_values,
                    &entry.ip_address,
                    &entry.user_agent,
                    &entry.url,
                    &entry.trace_id,
                ],
            )
            .await?;
        Ok(())
    }

    async fn for_model(
        &self,
        model_type: &str,
        model_id: i64,
    ) -> Result<Vec<AuditLog>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, model_type, model_id, user_id, event, old_values, new_values,
                       ip_address, user_agent, url, trace_id, created_at
                FROM audit_logs
                WHERE model_type = $1 AND model_id = $2
                ORDER BY id
                "#,
                &[&model_type, &model_id],
            )
            .await?;
        Ok(rows.iter().map(audit_from_row).collect())
    }
}

fn audit_from_row(row: &Row) -> AuditLog {
    let event: String = row.get("event");
    AuditLog {
        id: row.get("id"),
        model_type: row.get("model_type"),
        model_id: row.get("model_id"),
        user_id: row.get("user_id"),
        event: AuditEvent::parse(&event).unwrap_or(AuditEvent::Updated),
        old_values: row.get("old_values"),
        new_values: row.get("new_values"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        url: row.get("url"),
        trace_id: row.get("trace_id"),
        created_at: row.get("created_at"),
    }
}

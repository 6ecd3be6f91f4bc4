use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{NewPayment, Payment};
use serde_json::Value;
use tokio_postgres::Row;

use crate::RepositoryError;

const PAYMENT_COLUMNS: &str = "id, user_id, order_id, merchant_oid, payment_provider, \
     payment_method, amount, currency, status, paytr_token, transaction_id, masked_pan, \
     installment_count, provider_response, error_message, terms_accepted, terms_accepted_at, \
     terms_acceptance_ip, completed_at, created_at, updated_at";

/// # PaymentsRepository
///
/// Payment attempts against the gateway. The `*_if_open` transitions only
/// touch payments that are still pending or processing and return `None`
/// otherwise, which makes repeated gateway callbacks harmless.
#[async_trait]
pub trait PaymentsRepository: Send + Sync {
    async fn create(&self, payment: &NewPayment) -> Result<Payment, RepositoryError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<Payment>, RepositoryError>;
    async fn find_by_merchant_oid(&self, merchant_oid: &str)
    -> Result<Option<Payment>, RepositoryError>;
    /// Stores the gateway token and moves a pending payment to processing.
    async fn mark_processing(&self, id: i64, token: &str) -> Result<Payment, RepositoryError>;
    async fn complete_if_open(
        &self,
        id: i64,
        transaction_id: &str,
        provider_response: &Value,
    ) -> Result<Option<Payment>, RepositoryError>;
    async fn fail_if_open(
        &self,
        id: i64,
        error_message: &str,
        provider_response: Option<&Value>,
    ) -> Result<Option<Payment>, RepositoryError>;
}

pub struct PgPaymentsRepository {
    pool: Pool,
}

impl PgPaymentsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentsRepository for PgPaymentsRepository {
    async fn create(&self, payment: &NewPayment) -> Result<Payment, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO payments (
                 user_id, order_id, merchant_oid, payment_provider, amount, currency, status,
                 terms_accepted, terms_accepted_at, terms_acceptance_ip
             )
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9)
             RETURNING {PAYMENT_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &payment.user_id,
                    &payment.order_id,
                    &payment.merchant_oid,
                    &payment.payment_provider,
                    &payment.amount,
                    &payment.currency,
                    &payment.terms_accepted,
                    &payment.terms_accepted_at,
                    &payment.terms_acceptance_ip,
                ],
            )
            .await?;
        Ok(payment_from_row(&row))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Payment>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        Ok(row.as_ref().map(payment_from_row))
    }

    async fn find_by_merchant_oid(
        &self,
        merchant_oid: &str,
    ) -> Result<Option<Payment>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE merchant_oid = $1");
        let row = client.query_opt(sql.as_str(), &[&merchant_oid]).await?;
        Ok(row.as_ref().map(payment_from_row))
    }

    async fn mark_processing(&self, id: i64, token: &str) -> Result<Payment, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE payments SET status = 'processing', paytr_token = $2, updated_at = now()
             WHERE id = $1 AND status = 'pending'
             RETURNING {PAYMENT_COLUMNS}"
        );
        let row = client.query_opt(sql.as_str(), &[&id, &token]).await?;
        row.as_ref()
            .map(payment_from_row)
            .ok_or(RepositoryError::NotFound)
    }

    async fn complete_if_open(
        &self,
        id: i64,
        transaction_id: &str,
        provider_response: &Value,
    ) -> Result<Option<Payment>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE payments
             SET status = 'completed', transaction_id = $2, provider_response = $3,
                 completed_at = now(), updated_at = now()
             WHERE id = $1 AND status IN ('pending', 'processing')
             RETURNING {PAYMENT_COLUMNS}"
        );
        let row = client
            .query_opt(sql.as_str(), &[&id, &transaction_id, provider_response])
            .await?;
        Ok(row.as_ref().map(payment_from_row))
    }

    async fn fail_if_open(
        &self,
        id: i64,
        error_message: &str,
        provider_response: Option<&Value>,
    ) -> Result<Option<Payment>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE payments
             SET status = 'failed', error_message = $2,
                 provider_response = COALESCE($3, provider_response), updated_at = now()
             WHERE id = $1 AND status IN ('pending', 'processing')
             RETURNING {PAYMENT_COLUMNS}"
        );
        let row = client
            .query_opt(sql.as_str(), &[&id, &error_message, &provider_response])
            .await?;
        Ok(row.as_ref().map(payment_from_row))
    }
}

fn payment_from_row(row: &Row) -> Payment {
    Payment {
        id: row.get("id"),
        user_id: row.get("user_id"),
        order_id: row.get("order_id"),
        merchant_oid: row.get("merchant_oid"),
        payment_provider: row.get("payment_provider"),
        payment_method: row.get("payment_method"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        status: row.get("status"),
        paytr_token: row.get("paytr_token"),
        transaction_id: row.get("transaction_id"),
        masked_pan: row.get("masked_pan"),
        installment_count: row.get("installment_count"),
        provider_response: row.get("provider_response"),
        error_message: row.get("error_message"),
        terms_accepted: row.get("terms_accepted"),
        terms_accepted_at: row.get("terms_accepted_at"),
        terms_acceptance_ip: row.get("terms_acceptance_ip"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

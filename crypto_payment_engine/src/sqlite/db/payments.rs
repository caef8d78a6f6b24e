use log::*;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{InvoiceId, Payment},
    serialization::BlobSerializer,
    traits::InvoiceRepositoryError,
};

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: String,
    pub invoice_id: String,
    pub accounted: bool,
    pub blob: String,
}

impl PaymentRow {
    pub fn into_payment(self, serializer: &BlobSerializer) -> Result<Payment, InvoiceRepositoryError> {
        let payment = serializer.deserialize_payment(InvoiceId(self.invoice_id), self.accounted, &self.blob)?;
        if payment.id != self.id {
            return Err(InvoiceRepositoryError::InvalidData(format!(
                "Payment row {} holds data for payment {}",
                self.id, payment.id
            )));
        }
        Ok(payment)
    }
}

/// Inserts a new payment. A payment with the same id already being present results in
/// [`InvoiceRepositoryError::PaymentAlreadyRecorded`].
pub async fn idempotent_insert(
    payment: &Payment,
    blob: &str,
    conn: &mut SqliteConnection,
) -> Result<(), InvoiceRepositoryError> {
    sqlx::query(
        r#"
            INSERT INTO payments (id, invoice_id, accounted, received_time, blob) VALUES ($1, $2, $3, $4, $5);
        "#,
    )
    .bind(&payment.id)
    .bind(payment.invoice_id.as_str())
    .bind(payment.accounted)
    .bind(payment.received_time)
    .bind(blob)
    .execute(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            InvoiceRepositoryError::PaymentAlreadyRecorded(payment.id.clone())
        },
        _ => InvoiceRepositoryError::from(e),
    })?;
    debug!("🗃️ Payment {} recorded for invoice [{}]", payment.id, payment.invoice_id);
    Ok(())
}

/// All payments of the invoice, in the order they were received.
pub async fn fetch_payments_for_invoice(
    invoice_id: &InvoiceId,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentRow>, sqlx::Error> {
    let rows = sqlx::query_as(
        "SELECT id, invoice_id, accounted, blob FROM payments WHERE invoice_id = $1 ORDER BY received_time ASC, id ASC",
    )
    .bind(invoice_id.as_str())
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn fetch_payment(id: &str, conn: &mut SqliteConnection) -> Result<Option<PaymentRow>, sqlx::Error> {
    let row = sqlx::query_as("SELECT id, invoice_id, accounted, blob FROM payments WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn update_payment(
    payment: &Payment,
    blob: &str,
    conn: &mut SqliteConnection,
) -> Result<(), InvoiceRepositoryError> {
    let result = sqlx::query(
        "UPDATE payments SET accounted = $1, blob = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $3 AND invoice_id = $4",
    )
    .bind(payment.accounted)
    .bind(blob)
    .bind(&payment.id)
    .bind(payment.invoice_id.as_str())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(InvoiceRepositoryError::PaymentNotFound(payment.id.clone()));
    }
    trace!("🗃️ Payment {} updated. Accounted: {}", payment.id, payment.accounted);
    Ok(())
}

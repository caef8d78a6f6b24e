use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::*;
use rust_decimal::Decimal;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{ConversionError, Invoice, InvoiceAddress, InvoiceId, InvoiceState, Payment, SpeedPolicy},
    serialization::BlobSerializer,
    traits::InvoiceRepositoryError,
};

/// An `invoices` row, with the payment method blob still serialized.
#[derive(Debug, Clone, FromRow)]
pub struct InvoiceRow {
    pub id: String,
    pub store_id: String,
    pub order_id: Option<String>,
    pub price: String,
    pub currency: String,
    pub invoice_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub monitoring_expiration: DateTime<Utc>,
    pub speed_policy: String,
    pub status: String,
    pub exception_status: String,
    pub archived: bool,
    pub payment_tolerance: String,
    pub blob: String,
}

impl InvoiceRow {
    pub fn into_invoice(
        self,
        payments: Vec<Payment>,
        addresses: Vec<InvoiceAddress>,
        serializer: &BlobSerializer,
    ) -> Result<Invoice, InvoiceRepositoryError> {
        let invalid = |field: &str, e: String| InvoiceRepositoryError::InvalidData(format!("{field} of {}: {e}", self.id));
        let price = Decimal::from_str(&self.price).map_err(|e| invalid("price", e.to_string()))?;
        let payment_tolerance =
            Decimal::from_str(&self.payment_tolerance).map_err(|e| invalid("payment tolerance", e.to_string()))?;
        let speed_policy =
            self.speed_policy.parse::<SpeedPolicy>().map_err(|e: ConversionError| invalid("speed policy", e.0))?;
        let payment_methods = serializer.deserialize_payment_methods(&self.blob)?;
        Ok(Invoice {
            id: InvoiceId(self.id),
            store_id: self.store_id,
            order_id: self.order_id,
            price,
            currency: self.currency,
            invoice_time: self.invoice_time,
            expiration_time: self.expiration_time,
            monitoring_expiration: self.monitoring_expiration,
            speed_policy,
            status: self.status.into(),
            exception_status: self.exception_status.into(),
            archived: self.archived,
            payment_tolerance,
            payment_methods,
            payments,
            addresses,
        })
    }
}

/// Inserts the invoice row. The payment methods must already be serialized into `blob`.
/// This is not atomic. You can embed this call inside a transaction if you need to ensure atomicity, and pass
/// `&mut *tx` as the connection argument.
pub async fn insert_invoice(
    invoice: &Invoice,
    blob: &str,
    conn: &mut SqliteConnection,
) -> Result<(), InvoiceRepositoryError> {
    sqlx::query(
        r#"
            INSERT INTO invoices (
                id,
                store_id,
                order_id,
                price,
                currency,
                invoice_time,
                expiration_time,
                monitoring_expiration,
                speed_policy,
                status,
                exception_status,
                archived,
                payment_tolerance,
                blob
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14);
        "#,
    )
    .bind(invoice.id.as_str())
    .bind(&invoice.store_id)
    .bind(&invoice.order_id)
    .bind(invoice.price.to_string())
    .bind(&invoice.currency)
    .bind(invoice.invoice_time)
    .bind(invoice.expiration_time)
    .bind(invoice.monitoring_expiration)
    .bind(invoice.speed_policy.to_string())
    .bind(invoice.status.to_string())
    .bind(invoice.exception_status.to_string())
    .bind(invoice.archived)
    .bind(invoice.payment_tolerance.to_string())
    .bind(blob)
    .execute(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            InvoiceRepositoryError::InvoiceAlreadyExists(invoice.id.clone())
        },
        _ => InvoiceRepositoryError::from(e),
    })?;
    debug!("🗃️ Invoice [{}] inserted for store {}", invoice.id, invoice.store_id);
    Ok(())
}

pub async fn fetch_invoice_row(id: &InvoiceId, conn: &mut SqliteConnection) -> Result<Option<InvoiceRow>, sqlx::Error> {
    let row = sqlx::query_as("SELECT * FROM invoices WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(row)
}

/// All invoice rows that are in the pending set, oldest first.
pub async fn fetch_pending_invoice_rows(conn: &mut SqliteConnection) -> Result<Vec<InvoiceRow>, sqlx::Error> {
    let rows = sqlx::query_as(
        r#"
        SELECT invoices.* FROM invoices
        JOIN pending_invoices ON pending_invoices.invoice_id = invoices.id
        ORDER BY invoices.invoice_time ASC
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn update_status(
    id: &InvoiceId,
    state: InvoiceState,
    conn: &mut SqliteConnection,
) -> Result<(), InvoiceRepositoryError> {
    let result = sqlx::query(
        "UPDATE invoices SET status = $1, exception_status = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $3",
    )
    .bind(state.status.to_string())
    .bind(state.exception_status.to_string())
    .bind(id.as_str())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(InvoiceRepositoryError::InvoiceNotFound(id.clone()));
    }
    trace!("🗃️ Invoice [{id}] status set to {state}");
    Ok(())
}

/// Sets the status pair only if the invoice is still in state `from`. Returns `false` if it was not.
pub async fn compare_and_set_status(
    id: &InvoiceId,
    from: InvoiceState,
    to: InvoiceState,
    conn: &mut SqliteConnection,
) -> Result<bool, InvoiceRepositoryError> {
    let result = sqlx::query(
        "UPDATE invoices SET status = $1, exception_status = $2, updated_at = CURRENT_TIMESTAMP \
         WHERE id = $3 AND status = $4 AND exception_status = $5",
    )
    .bind(to.status.to_string())
    .bind(to.exception_status.to_string())
    .bind(id.as_str())
    .bind(from.status.to_string())
    .bind(from.exception_status.to_string())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() > 0 {
        trace!("🗃️ Invoice [{id}] moved from {from} to {to}");
        return Ok(true);
    }
    if fetch_invoice_row(id, conn).await?.is_none() {
        return Err(InvoiceRepositoryError::InvoiceNotFound(id.clone()));
    }
    Ok(false)
}

pub async fn update_blob(id: &InvoiceId, blob: &str, conn: &mut SqliteConnection) -> Result<(), InvoiceRepositoryError> {
    let result = sqlx::query("UPDATE invoices SET blob = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(blob)
        .bind(id.as_str())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(InvoiceRepositoryError::InvoiceNotFound(id.clone()));
    }
    Ok(())
}

pub async fn set_archived(id: &InvoiceId, archived: bool, conn: &mut SqliteConnection) -> Result<(), InvoiceRepositoryError> {
    let result = sqlx::query("UPDATE invoices SET archived = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(archived)
        .bind(id.as_str())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(InvoiceRepositoryError::InvoiceNotFound(id.clone()));
    }
    Ok(())
}

pub async fn fetch_speed_policy(id: &InvoiceId, conn: &mut SqliteConnection) -> Result<Option<String>, sqlx::Error> {
    let policy: Option<(String,)> =
        sqlx::query_as("SELECT speed_policy FROM invoices WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(policy.map(|p| p.0))
}

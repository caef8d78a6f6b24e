use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{InvoiceAddress, InvoiceId, PaymentMethodId},
    traits::InvoiceRepositoryError,
};

#[derive(Debug, Clone, FromRow)]
struct AddressRow {
    address: String,
    payment_method_id: String,
    invoice_id: String,
    assigned_at: DateTime<Utc>,
    unassigned_at: Option<DateTime<Utc>>,
}

/// Assigns the address to the invoice. Returns `false` if the address is already known, whichever invoice it belongs
/// to.
pub async fn assign_address(
    invoice_id: &InvoiceId,
    payment_method_id: &PaymentMethodId,
    address: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
            INSERT OR IGNORE INTO address_invoices (crypto_code, address, payment_method_id, invoice_id, assigned_at)
            VALUES ($1, $2, $3, $4, $5);
        "#,
    )
    .bind(&payment_method_id.crypto_code)
    .bind(address)
    .bind(payment_method_id.to_string())
    .bind(invoice_id.as_str())
    .bind(Utc::now())
    .execute(conn)
    .await?;
    let inserted = result.rows_affected() > 0;
    if inserted {
        trace!("🗃️ Address {address} assigned to invoice [{invoice_id}]");
    }
    Ok(inserted)
}

/// Marks all the invoice's active addresses as unassigned.
pub async fn unaffect_addresses(invoice_id: &InvoiceId, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE address_invoices SET unassigned_at = $1 WHERE invoice_id = $2 AND unassigned_at IS NULL",
    )
    .bind(Utc::now())
    .bind(invoice_id.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn fetch_addresses(
    invoice_id: &InvoiceId,
    conn: &mut SqliteConnection,
) -> Result<Vec<InvoiceAddress>, InvoiceRepositoryError> {
    let rows: Vec<AddressRow> = sqlx::query_as(
        r#"
        SELECT address, payment_method_id, invoice_id, assigned_at, unassigned_at FROM address_invoices
        WHERE invoice_id = $1 ORDER BY assigned_at ASC
        "#,
    )
    .bind(invoice_id.as_str())
    .fetch_all(conn)
    .await?;
    rows.into_iter()
        .map(|row| {
            let payment_method_id = row
                .payment_method_id
                .parse::<PaymentMethodId>()
                .map_err(|e| InvoiceRepositoryError::InvalidData(e.to_string()))?;
            Ok(InvoiceAddress {
                invoice_id: InvoiceId(row.invoice_id),
                payment_method_id,
                address: row.address,
                assigned_at: row.assigned_at,
                unassigned_at: row.unassigned_at,
            })
        })
        .collect()
}

/// The invoice the address is actively assigned to.
pub async fn find_active_invoice(
    crypto_code: &str,
    address: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<InvoiceId>, sqlx::Error> {
    let id: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT invoice_id FROM address_invoices
        WHERE crypto_code = $1 AND address = $2 AND unassigned_at IS NULL
        "#,
    )
    .bind(crypto_code.to_ascii_uppercase())
    .bind(address)
    .fetch_optional(conn)
    .await?;
    Ok(id.map(|(id,)| InvoiceId(id)))
}

use sqlx::SqliteConnection;

use crate::db_types::InvoiceId;

pub async fn add_pending(id: &InvoiceId, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO pending_invoices (invoice_id) VALUES ($1)").bind(id.as_str()).execute(conn).await?;
    Ok(())
}

/// Returns `true` if the invoice was in the pending set.
pub async fn remove_pending(id: &InvoiceId, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM pending_invoices WHERE invoice_id = $1").bind(id.as_str()).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_pending_ids(conn: &mut SqliteConnection) -> Result<Vec<InvoiceId>, sqlx::Error> {
    let ids: Vec<(String,)> =
        sqlx::query_as("SELECT invoice_id FROM pending_invoices ORDER BY created_at ASC").fetch_all(conn).await?;
    Ok(ids.into_iter().map(|(id,)| InvoiceId(id)).collect())
}

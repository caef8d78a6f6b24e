use sqlx::SqliteConnection;

use crate::db_types::InvoiceId;

/// Adds search terms to the invoice. Empty and duplicate terms are skipped.
pub async fn add_terms(id: &InvoiceId, terms: &[String], conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for term in terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        sqlx::query("INSERT OR IGNORE INTO invoice_search (invoice_id, term) VALUES ($1, $2)")
            .bind(id.as_str())
            .bind(term)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn remove_terms(id: &InvoiceId, terms: &[String], conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for term in terms {
        sqlx::query("DELETE FROM invoice_search WHERE invoice_id = $1 AND term = $2")
            .bind(id.as_str())
            .bind(term.trim())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Ids of the invoices having a term that contains `text`, most recently created invoice first.
pub async fn search(text: &str, conn: &mut SqliteConnection) -> Result<Vec<InvoiceId>, sqlx::Error> {
    let pattern = contains_pattern(text);
    let ids: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT invoices.id FROM invoices
        WHERE invoices.id IN (SELECT invoice_id FROM invoice_search WHERE term LIKE $1 ESCAPE '\')
        ORDER BY invoices.invoice_time DESC, invoices.id ASC
        "#,
    )
    .bind(pattern)
    .fetch_all(conn)
    .await?;
    Ok(ids.into_iter().map(|(id,)| InvoiceId(id)).collect())
}

/// A `LIKE` pattern matching terms that contain `text` literally.
fn contains_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

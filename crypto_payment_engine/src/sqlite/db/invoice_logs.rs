use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, SqliteConnection};

use crate::db_types::{InvoiceId, InvoiceLog, LogSeverity};

#[derive(Debug, Clone, FromRow)]
struct InvoiceLogRow {
    timestamp: DateTime<Utc>,
    severity: String,
    message: String,
}

pub async fn insert_logs(id: &InvoiceId, logs: &[InvoiceLog], conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for log in logs {
        sqlx::query("INSERT INTO invoice_events (invoice_id, timestamp, severity, message) VALUES ($1, $2, $3, $4)")
            .bind(id.as_str())
            .bind(log.timestamp)
            .bind(log.severity.to_string())
            .bind(&log.message)
            .execute(&mut *conn)
            .await?;
    }
    trace!("🗃️ {} log entries added to invoice [{id}]", logs.len());
    Ok(())
}

/// The invoice's log entries, oldest first. Entries with an unknown severity are reported as `Info`.
pub async fn fetch_logs(id: &InvoiceId, conn: &mut SqliteConnection) -> Result<Vec<InvoiceLog>, sqlx::Error> {
    let rows: Vec<InvoiceLogRow> = sqlx::query_as(
        "SELECT timestamp, severity, message FROM invoice_events WHERE invoice_id = $1 ORDER BY timestamp ASC, id ASC",
    )
    .bind(id.as_str())
    .fetch_all(conn)
    .await?;
    let logs = rows
        .into_iter()
        .map(|row| {
            let severity = row.severity.parse::<LogSeverity>().unwrap_or_else(|e| {
                warn!("🗃️ {e}. Treating it as Info");
                LogSeverity::Info
            });
            InvoiceLog { timestamp: row.timestamp, severity, message: row.message }
        })
        .collect();
    Ok(logs)
}

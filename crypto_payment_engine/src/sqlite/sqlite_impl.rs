//! `SqliteDatabase` is the SQLite backend of the payment engine.
//!
//! Invoices are stored as a row with the scalar fields, plus a JSON blob holding the payment methods. Payments have
//! their own table, also with a JSON blob for the rail-specific data. Every repository call runs in its own
//! connection or transaction, so callers never see partially applied writes.
use std::fmt::Debug;

use log::*;
use sqlx::{SqliteConnection, SqlitePool};

use super::db::{addresses, db_url, exchange_rates, invoice_logs, invoices, new_pool, payments, pending, search};
use crate::{
    cpe_api::exchange_objects::{CurrencyPair, ExchangeRate},
    db_types::{
        ConversionError,
        Invoice,
        InvoiceId,
        InvoiceLog,
        InvoiceState,
        Payment,
        PaymentMethod,
        PaymentMethodId,
        SpeedPolicy,
    },
    serialization::BlobSerializer,
    traits::{ExchangeRateError, ExchangeRates, InvoiceRepository, InvoiceRepositoryError, PaymentUpdateResult},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
    serializer: BlobSerializer,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, using the URL in `CPG_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool, serializer: BlobSerializer::default() })
    }

    /// Replaces the serializer, e.g. to register extra payment method handlers.
    pub fn with_serializer(mut self, serializer: BlobSerializer) -> Self {
        self.serializer = serializer;
        self
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn serializer(&self) -> &BlobSerializer {
        &self.serializer
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn load_invoice(
        &self,
        id: &InvoiceId,
        include_addresses: bool,
        conn: &mut SqliteConnection,
    ) -> Result<Option<Invoice>, InvoiceRepositoryError> {
        let Some(row) = invoices::fetch_invoice_row(id, &mut *conn).await? else {
            return Ok(None);
        };
        let payments = payments::fetch_payments_for_invoice(id, &mut *conn)
            .await?
            .into_iter()
            .map(|p| p.into_payment(&self.serializer))
            .collect::<Result<Vec<Payment>, _>>()?;
        let addresses = if include_addresses { addresses::fetch_addresses(id, &mut *conn).await? } else { vec![] };
        let invoice = row.into_invoice(payments, addresses, &self.serializer)?;
        Ok(Some(invoice))
    }

    async fn replace_payment_method(
        &self,
        id: &InvoiceId,
        method: &PaymentMethod,
        conn: &mut SqliteConnection,
    ) -> Result<(), InvoiceRepositoryError> {
        let row =
            invoices::fetch_invoice_row(id, &mut *conn).await?.ok_or(InvoiceRepositoryError::InvoiceNotFound(id.clone()))?;
        let mut methods = self.serializer.deserialize_payment_methods(&row.blob)?;
        match methods.iter_mut().find(|m| m.id == method.id) {
            Some(existing) => *existing = method.clone(),
            None => {
                return Err(InvoiceRepositoryError::InvalidData(format!(
                    "Invoice {id} has no payment method {}",
                    method.id
                )))
            },
        }
        let blob = self.serializer.serialize_payment_methods(&methods)?;
        invoices::update_blob(id, &blob, &mut *conn).await?;
        search::add_terms(id, &[method.details.destination().to_string()], conn).await?;
        trace!("🗃️ Payment method {} of invoice [{id}] updated", method.id);
        Ok(())
    }
}

impl InvoiceRepository for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Stores the invoice, and in the same transaction
    /// * assigns the deposit addresses of its on-chain payment methods,
    /// * adds it to the pending set,
    /// * indexes its search terms,
    /// * writes the given log entries.
    async fn create_invoice(&self, invoice: Invoice, logs: Vec<InvoiceLog>) -> Result<Invoice, InvoiceRepositoryError> {
        let blob = self.serializer.serialize_payment_methods(&invoice.payment_methods)?;
        let mut tx = self.pool.begin().await?;
        invoices::insert_invoice(&invoice, &blob, &mut tx).await?;
        for method in &invoice.payment_methods {
            if let Some(details) = method.details.as_bitcoin() {
                addresses::assign_address(&invoice.id, &method.id, &details.deposit_address, &mut tx).await?;
            }
        }
        pending::add_pending(&invoice.id, &mut tx).await?;
        search::add_terms(&invoice.id, &invoice.search_terms(), &mut tx).await?;
        invoice_logs::insert_logs(&invoice.id, &logs, &mut tx).await?;
        let saved = self.load_invoice(&invoice.id, true, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Invoice [{}] has been saved with {} payment methods", invoice.id, invoice.payment_methods.len());
        saved.ok_or(InvoiceRepositoryError::InvoiceNotFound(invoice.id))
    }

    async fn get_invoice(
        &self,
        id: &InvoiceId,
        include_addresses: bool,
    ) -> Result<Option<Invoice>, InvoiceRepositoryError> {
        let mut tx = self.pool.begin().await?;
        let invoice = self.load_invoice(id, include_addresses, &mut tx).await?;
        tx.commit().await?;
        Ok(invoice)
    }

    async fn get_pending_invoice_ids(&self) -> Result<Vec<InvoiceId>, InvoiceRepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let ids = pending::fetch_pending_ids(&mut conn).await?;
        Ok(ids)
    }

    async fn get_pending_invoices(&self) -> Result<Vec<Invoice>, InvoiceRepositoryError> {
        let mut tx = self.pool.begin().await?;
        let rows = invoices::fetch_pending_invoice_rows(&mut tx).await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let id = InvoiceId(row.id.clone());
            let payments = payments::fetch_payments_for_invoice(&id, &mut tx)
                .await?
                .into_iter()
                .map(|p| p.into_payment(&self.serializer))
                .collect::<Result<Vec<Payment>, _>>()?;
            let addresses = addresses::fetch_addresses(&id, &mut tx).await?;
            result.push(row.into_invoice(payments, addresses, &self.serializer)?);
        }
        tx.commit().await?;
        Ok(result)
    }

    async fn remove_pending_invoice(&self, id: &InvoiceId) -> Result<bool, InvoiceRepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let removed = pending::remove_pending(id, &mut conn).await?;
        if removed {
            debug!("🗃️ Invoice [{id}] is no longer pending");
        }
        Ok(removed)
    }

    async fn update_invoice_status(&self, id: &InvoiceId, state: InvoiceState) -> Result<(), InvoiceRepositoryError> {
        let mut conn = self.pool.acquire().await?;
        invoices::update_status(id, state, &mut conn).await
    }

    async fn transition_invoice_status(
        &self,
        id: &InvoiceId,
        from: InvoiceState,
        to: InvoiceState,
    ) -> Result<bool, InvoiceRepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let moved = invoices::compare_and_set_status(id, from, to, &mut conn).await?;
        if !moved {
            debug!("🗃️ Invoice [{id}] is no longer {from}. It was not moved to {to}");
        }
        Ok(moved)
    }

    async fn update_payment_method(&self, id: &InvoiceId, method: &PaymentMethod) -> Result<(), InvoiceRepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.replace_payment_method(id, method, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Inserts the payment, and in the same transaction
    /// * indexes its search terms,
    /// * replaces the given payment method,
    /// * writes the given log entries.
    async fn add_payment(
        &self,
        payment: &Payment,
        method: Option<&PaymentMethod>,
        logs: &[InvoiceLog],
    ) -> Result<Payment, InvoiceRepositoryError> {
        let blob = self.serializer.serialize_payment(payment)?;
        let id = &payment.invoice_id;
        let mut tx = self.pool.begin().await?;
        if invoices::fetch_speed_policy(id, &mut tx).await?.is_none() {
            return Err(InvoiceRepositoryError::InvoiceNotFound(id.clone()));
        }
        payments::idempotent_insert(payment, &blob, &mut tx).await?;
        search::add_terms(id, &payment.data.search_terms(), &mut tx).await?;
        if let Some(method) = method {
            self.replace_payment_method(id, method, &mut tx).await?;
        }
        invoice_logs::insert_logs(id, logs, &mut tx).await?;
        tx.commit().await?;
        Ok(payment.clone())
    }

    async fn update_payments(&self, payments: &[Payment]) -> Result<Vec<PaymentUpdateResult>, InvoiceRepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(payments.len());
        for payment in payments {
            let previous = payments::fetch_payment(&payment.id, &mut tx)
                .await?
                .ok_or_else(|| InvoiceRepositoryError::PaymentNotFound(payment.id.clone()))?
                .into_payment(&self.serializer)?;
            let speed_policy = invoices::fetch_speed_policy(&payment.invoice_id, &mut tx)
                .await?
                .ok_or_else(|| InvoiceRepositoryError::InvoiceNotFound(payment.invoice_id.clone()))?
                .parse::<SpeedPolicy>()
                .map_err(|e: ConversionError| InvoiceRepositoryError::InvalidData(e.0))?;
            let blob = self.serializer.serialize_payment(payment)?;
            payments::update_payment(payment, &blob, &mut tx).await?;
            results.push(PaymentUpdateResult { previous, updated: payment.clone(), speed_policy });
        }
        tx.commit().await?;
        debug!("🗃️ {} payments updated", results.len());
        Ok(results)
    }

    async fn unaffect_address(&self, id: &InvoiceId) -> Result<(), InvoiceRepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let count = addresses::unaffect_addresses(id, &mut conn).await?;
        debug!("🗃️ {count} addresses of invoice [{id}] released");
        Ok(())
    }

    async fn new_address(
        &self,
        id: &InvoiceId,
        payment_method_id: &PaymentMethodId,
        address: &str,
    ) -> Result<bool, InvoiceRepositoryError> {
        let mut tx = self.pool.begin().await?;
        let assigned = addresses::assign_address(id, payment_method_id, address, &mut tx).await?;
        if assigned {
            search::add_terms(id, &[address.to_string()], &mut tx).await?;
        }
        tx.commit().await?;
        Ok(assigned)
    }

    async fn find_invoice_by_address(
        &self,
        crypto_code: &str,
        address: &str,
    ) -> Result<Option<InvoiceId>, InvoiceRepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let id = addresses::find_active_invoice(crypto_code, address, &mut conn).await?;
        Ok(id)
    }

    async fn add_invoice_logs(&self, id: &InvoiceId, logs: &[InvoiceLog]) -> Result<(), InvoiceRepositoryError> {
        if logs.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        invoice_logs::insert_logs(id, logs, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_invoice_logs(&self, id: &InvoiceId) -> Result<Vec<InvoiceLog>, InvoiceRepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let logs = invoice_logs::fetch_logs(id, &mut conn).await?;
        Ok(logs)
    }

    async fn add_search_terms(&self, id: &InvoiceId, terms: &[String]) -> Result<(), InvoiceRepositoryError> {
        let mut tx = self.pool.begin().await?;
        search::add_terms(id, terms, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_search_terms(&self, id: &InvoiceId, terms: &[String]) -> Result<(), InvoiceRepositoryError> {
        let mut tx = self.pool.begin().await?;
        search::remove_terms(id, terms, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn search_invoices(&self, text: &str) -> Result<Vec<InvoiceId>, InvoiceRepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let ids = search::search(text, &mut conn).await?;
        Ok(ids)
    }

    async fn set_archived(&self, id: &InvoiceId, archived: bool) -> Result<(), InvoiceRepositoryError> {
        let mut conn = self.pool.acquire().await?;
        invoices::set_archived(id, archived, &mut conn).await
    }
}

impl ExchangeRates for SqliteDatabase {
    async fn fetch_bid_rate(&self, pair: &CurrencyPair) -> Result<ExchangeRate, ExchangeRateError> {
        let mut conn = self.pool.acquire().await?;
        exchange_rates::fetch_last_rate(pair, &mut conn).await
    }

    async fn set_exchange_rate(&self, rate: &ExchangeRate) -> Result<(), ExchangeRateError> {
        let mut conn = self.pool.acquire().await?;
        exchange_rates::set_exchange_rate(rate, &mut conn).await
    }
}

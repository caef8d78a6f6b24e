use std::future::Future;

use thiserror::Error;

use crate::{
    db_types::{Invoice, InvoiceId, InvoiceLog, InvoiceState, Payment, PaymentMethod, PaymentMethodId, SpeedPolicy},
    serialization::SerializationError,
};

#[derive(Debug, Clone, Error)]
pub enum InvoiceRepositoryError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("The requested invoice {0} does not exist")]
    InvoiceNotFound(InvoiceId),
    #[error("Cannot insert invoice, since it already exists with id {0}")]
    InvoiceAlreadyExists(InvoiceId),
    #[error("Cannot insert payment, since it already exists with id {0}")]
    PaymentAlreadyRecorded(String),
    #[error("The requested payment {0} does not exist")]
    PaymentNotFound(String),
    #[error("Could not read or write an invoice blob. {0}")]
    Serialization(#[from] SerializationError),
    #[error("The database contains invalid data. {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for InvoiceRepositoryError {
    fn from(e: sqlx::Error) -> Self {
        InvoiceRepositoryError::DatabaseError(e.to_string())
    }
}

/// What a payment looked like before [`InvoiceRepository::update_payments`] overwrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUpdateResult {
    pub previous: Payment,
    pub updated: Payment,
    /// The speed policy of the owning invoice, read in the same transaction as the update.
    pub speed_policy: SpeedPolicy,
}

impl PaymentUpdateResult {
    /// True if the update made the payment settled when it was not before.
    pub fn became_settled(&self) -> bool {
        !self.previous.is_settled(self.speed_policy) && self.updated.is_settled(self.speed_policy)
    }
}

/// The storage boundary of the reconciliation core.
///
/// Every method is atomic: it either applies all of its writes or none of them. None of the methods take a lock on
/// the invoice; the watcher makes sure that only one task reconciles a given invoice at a time.
pub trait InvoiceRepository: Clone + Send + Sync + 'static {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Stores a brand-new invoice, together with its deposit addresses, its search terms, the given log entries and
    /// its membership of the pending set.
    fn create_invoice(
        &self,
        invoice: Invoice,
        logs: Vec<InvoiceLog>,
    ) -> impl Future<Output = Result<Invoice, InvoiceRepositoryError>> + Send;

    /// Fetches the invoice with its payment methods and payments. Historical addresses are only loaded if
    /// `include_addresses` is set. Returns `None` if there is no such invoice.
    fn get_invoice(
        &self,
        id: &InvoiceId,
        include_addresses: bool,
    ) -> impl Future<Output = Result<Option<Invoice>, InvoiceRepositoryError>> + Send;

    /// The ids of all invoices that are still being watched.
    fn get_pending_invoice_ids(&self) -> impl Future<Output = Result<Vec<InvoiceId>, InvoiceRepositoryError>> + Send;

    /// All invoices that are still being watched, addresses included.
    fn get_pending_invoices(&self) -> impl Future<Output = Result<Vec<Invoice>, InvoiceRepositoryError>> + Send;

    /// Drops the invoice from the pending set. Returns `false` if it was not in the set.
    fn remove_pending_invoice(&self, id: &InvoiceId) -> impl Future<Output = Result<bool, InvoiceRepositoryError>> + Send;

    /// Overwrites the invoice's status pair, whatever it currently is.
    fn update_invoice_status(
        &self,
        id: &InvoiceId,
        state: InvoiceState,
    ) -> impl Future<Output = Result<(), InvoiceRepositoryError>> + Send;

    /// Moves the invoice from `from` to `to`. Nothing is written, and `false` is returned, if the invoice is no longer
    /// in state `from`.
    fn transition_invoice_status(
        &self,
        id: &InvoiceId,
        from: InvoiceState,
        to: InvoiceState,
    ) -> impl Future<Output = Result<bool, InvoiceRepositoryError>> + Send;

    /// Replaces the details of one payment method of the invoice.
    fn update_payment_method(
        &self,
        id: &InvoiceId,
        method: &PaymentMethod,
    ) -> impl Future<Output = Result<(), InvoiceRepositoryError>> + Send;

    /// Records a new payment and its search terms. In the same transaction, replaces `method` in the invoice (if
    /// given) and writes `logs`.
    ///
    /// Fails with [`InvoiceRepositoryError::PaymentAlreadyRecorded`] if a payment with the same id exists. Nothing is
    /// written if any step fails.
    fn add_payment(
        &self,
        payment: &Payment,
        method: Option<&PaymentMethod>,
        logs: &[InvoiceLog],
    ) -> impl Future<Output = Result<Payment, InvoiceRepositoryError>> + Send;

    /// Overwrites the accounted flag and data of already recorded payments, returning their previous versions.
    fn update_payments(
        &self,
        payments: &[Payment],
    ) -> impl Future<Output = Result<Vec<PaymentUpdateResult>, InvoiceRepositoryError>> + Send;

    /// Releases all of the invoice's addresses, so they no longer route notifications to it.
    fn unaffect_address(&self, id: &InvoiceId) -> impl Future<Output = Result<(), InvoiceRepositoryError>> + Send;

    /// Assigns a new address to the invoice. Returns `false` if the address was already assigned to it.
    fn new_address(
        &self,
        id: &InvoiceId,
        payment_method_id: &PaymentMethodId,
        address: &str,
    ) -> impl Future<Output = Result<bool, InvoiceRepositoryError>> + Send;

    /// The invoice an address is currently assigned to, if any.
    fn find_invoice_by_address(
        &self,
        crypto_code: &str,
        address: &str,
    ) -> impl Future<Output = Result<Option<InvoiceId>, InvoiceRepositoryError>> + Send;

    fn add_invoice_logs(
        &self,
        id: &InvoiceId,
        logs: &[InvoiceLog],
    ) -> impl Future<Output = Result<(), InvoiceRepositoryError>> + Send;

    /// The invoice's audit trail, oldest first.
    fn fetch_invoice_logs(
        &self,
        id: &InvoiceId,
    ) -> impl Future<Output = Result<Vec<InvoiceLog>, InvoiceRepositoryError>> + Send;

    fn add_search_terms(
        &self,
        id: &InvoiceId,
        terms: &[String],
    ) -> impl Future<Output = Result<(), InvoiceRepositoryError>> + Send;

    fn remove_search_terms(
        &self,
        id: &InvoiceId,
        terms: &[String],
    ) -> impl Future<Output = Result<(), InvoiceRepositoryError>> + Send;

    /// Ids of invoices with a search term containing `text`, most recent first.
    fn search_invoices(&self, text: &str) -> impl Future<Output = Result<Vec<InvoiceId>, InvoiceRepositoryError>> + Send;

    fn set_archived(
        &self,
        id: &InvoiceId,
        archived: bool,
    ) -> impl Future<Output = Result<(), InvoiceRepositoryError>> + Send;
}

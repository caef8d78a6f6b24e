//! The reconciliation loop.
//!
//! * [`InvoiceWatcher`] owns the work queue and the per-invoice tasks.
//! * [`reconcile`] is the invoice state machine.
//! * [`double_spend`] keeps recorded payments in line with their transactions.
mod invoice_watcher;

pub mod double_spend;
pub mod reconcile;

pub use invoice_watcher::InvoiceWatcher;
use thiserror::Error;

use crate::{
    accounting::AccountingError,
    cpe_api::errors::PaymentServiceError,
    db_types::InvoiceId,
    traits::{ChainClientError, InvoiceRepositoryError},
    watcher::reconcile::Transition,
};

#[derive(Debug, Clone, Error)]
pub enum WatcherError {
    #[error("Database error: {0}")]
    Repository(#[from] InvoiceRepositoryError),
    #[error("Could not record payments. {0}")]
    Payments(#[from] PaymentServiceError),
    #[error("Chain client error: {0}")]
    Chain(#[from] ChainClientError),
    #[error("Could not calculate the invoice balance. {0}")]
    Accounting(#[from] AccountingError),
    #[error("Invoice {0} changed underneath the watcher")]
    InvoiceDisappeared(InvoiceId),
}

/// What a single [`InvoiceWatcher::reconcile_invoice`] run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub rounds: usize,
    pub new_payments: usize,
    pub updated_payments: usize,
    /// Every status change, in order, across all rounds.
    pub transitions: Vec<Transition>,
    pub new_addresses: Vec<String>,
    pub stopped_watching: bool,
    /// Rounds thrown away because someone else changed the invoice's status in the meantime.
    pub conflicts: usize,
    /// The invoice does not exist.
    pub missing: bool,
}

use serde::{Deserialize, Serialize};

use crate::db_types::{InvoiceId, InvoiceState, Payment, PaymentMethodId};

/// The invoice moved from one (status, exception status) pair to another.
///
/// One event is published for every step the invoice takes, in order. An invoice going from `New` to `Paid` to
/// `Confirmed` in a single reconciliation produces two events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStatusChangedEvent {
    pub invoice_id: InvoiceId,
    pub old_state: InvoiceState,
    pub new_state: InvoiceState,
}

impl InvoiceStatusChangedEvent {
    pub fn new(invoice_id: InvoiceId, old_state: InvoiceState, new_state: InvoiceState) -> Self {
        Self { invoice_id, old_state, new_state }
    }
}

/// Something about the invoice changed (payments, addresses or status). Subscribers should re-read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDataChangedEvent {
    pub invoice_id: InvoiceId,
    pub state: InvoiceState,
}

impl InvoiceDataChangedEvent {
    pub fn new(invoice_id: InvoiceId, state: InvoiceState) -> Self {
        Self { invoice_id, state }
    }
}

/// Requests a reconciliation of the invoice. Published for deferred re-checks, e.g. when the invoice expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceNeedUpdateEvent {
    pub invoice_id: InvoiceId,
}

impl InvoiceNeedUpdateEvent {
    pub fn new(invoice_id: InvoiceId) -> Self {
        Self { invoice_id }
    }
}

/// A payment became settled: it is accounted, and confirmed under the invoice's speed policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSettledEvent {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
}

impl PaymentSettledEvent {
    pub fn new(invoice_id: InvoiceId, payment: Payment) -> Self {
        Self { invoice_id, payment }
    }
}

/// A new payment was recorded against the invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceivedEvent {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
}

impl PaymentReceivedEvent {
    pub fn new(invoice_id: InvoiceId, payment: Payment) -> Self {
        Self { invoice_id, payment }
    }
}

/// The invoice was given a fresh deposit address after a partial payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceNewAddressEvent {
    pub invoice_id: InvoiceId,
    pub payment_method_id: PaymentMethodId,
    pub address: String,
}

impl InvoiceNewAddressEvent {
    pub fn new(invoice_id: InvoiceId, payment_method_id: PaymentMethodId, address: String) -> Self {
        Self { invoice_id, payment_method_id, address }
    }
}

/// The invoice reached a terminal state and will no longer be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStopWatchedEvent {
    pub invoice_id: InvoiceId,
}

impl InvoiceStopWatchedEvent {
    pub fn new(invoice_id: InvoiceId) -> Self {
        Self { invoice_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    InvoiceStatusChanged(InvoiceStatusChangedEvent),
    InvoiceDataChanged(InvoiceDataChangedEvent),
    InvoiceNeedUpdate(InvoiceNeedUpdateEvent),
    PaymentSettled(PaymentSettledEvent),
    PaymentReceived(PaymentReceivedEvent),
    InvoiceNewAddress(InvoiceNewAddressEvent),
    InvoiceStopWatched(InvoiceStopWatchedEvent),
}

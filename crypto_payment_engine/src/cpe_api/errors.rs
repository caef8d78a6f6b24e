use thiserror::Error;

use crate::{
    accounting::AccountingError,
    db_types::{InvoiceId, InvoiceState, PaymentMethodId},
    traits::{ExchangeRateError, InvoiceRepositoryError},
};

#[derive(Debug, Clone, Error)]
pub enum PaymentServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] InvoiceRepositoryError),
}

/// An operator action that the invoice's current state does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    MarkComplete,
    MarkInvalid,
    Refund,
}

impl std::fmt::Display for OperatorAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorAction::MarkComplete => write!(f, "mark complete"),
            OperatorAction::MarkInvalid => write!(f, "mark invalid"),
            OperatorAction::Refund => write!(f, "refund"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum InvoiceFlowError {
    #[error("Database error: {0}")]
    DatabaseError(InvoiceRepositoryError),
    #[error("The requested invoice {0} does not exist")]
    InvoiceNotFound(InvoiceId),
    #[error("Cannot {action} invoice {invoice_id} while it is {state}")]
    ConflictingState { invoice_id: InvoiceId, state: InvoiceState, action: OperatorAction },
    #[error("Payment method {0} is not supported")]
    UnsupportedPaymentMethod(PaymentMethodId),
    #[error("No exchange rate is available. {0}")]
    RateUnavailable(#[from] ExchangeRateError),
    #[error("Could not calculate the invoice balance. {0}")]
    AccountingError(#[from] AccountingError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<InvoiceRepositoryError> for InvoiceFlowError {
    fn from(e: InvoiceRepositoryError) -> Self {
        match e {
            InvoiceRepositoryError::InvoiceNotFound(id) => InvoiceFlowError::InvoiceNotFound(id),
            e => InvoiceFlowError::DatabaseError(e),
        }
    }
}

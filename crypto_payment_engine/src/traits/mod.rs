//! The contracts the reconciliation core relies on.
//!
//! Storage, chain access and rate lookups are collaborators. The core only talks to them through these traits, so
//! any backend that implements them can be plugged in. [`crate::SqliteDatabase`] provides the storage traits.
mod chain_client;
mod exchange_rates;
mod invoice_repository;

pub use chain_client::{ChainClient, ChainClientError, ChainEvent, Changeset, ReservedAddress, TransactionInfo, Utxo};
pub use exchange_rates::{ExchangeRateError, ExchangeRates};
pub use invoice_repository::{InvoiceRepository, InvoiceRepositoryError, PaymentUpdateResult};

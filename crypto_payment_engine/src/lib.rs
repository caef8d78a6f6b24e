//! Crypto Payment Engine
//!
//! The Crypto Payment Engine is the reconciliation core of a self-hosted crypto payment processor. It keeps invoices
//! in step with the payments made to them, on chain or over Lightning, and decides when an invoice is paid, confirmed
//! and complete. It is provider-agnostic: storage, chain access and exchange rates are pluggable.
//!
//! The library is divided into these main sections:
//! 1. The invoice model ([`mod@db_types`], [`mod@invoice_state`]) and the payment rails ([`mod@payment_methods`]),
//!    with the per-method balance calculation in [`mod@accounting`].
//! 2. Storage ([`mod@traits`]). [`SqliteDatabase`] is the bundled backend. You should never need to touch the
//!    database directly. Use the public API instead.
//! 3. The public API: [`PaymentService`] records payments, [`InvoiceFlowApi`] creates and queries invoices and
//!    handles operator overrides.
//! 4. The [`InvoiceWatcher`] ([`mod@watcher`]), which drives every pending invoice through the state machine as the
//!    chain moves.
//!
//! The engine also publishes events when an invoice changes ([`mod@events`]). A simple actor framework lets you hook
//! into them and react, e.g. by sending a webhook.
pub mod accounting;
pub mod config;
pub mod db_types;
pub mod events;
pub mod invoice_state;
pub mod payment_methods;
pub mod serialization;
pub mod traits;
pub mod watcher;

mod cpe_api;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use config::{ChainNetwork, WatcherConfig};
pub use cpe_api::{
    errors::{InvoiceFlowError, OperatorAction, PaymentServiceError},
    exchange_objects,
    invoice_flow_api::InvoiceFlowApi,
    invoice_objects,
    payment_service::PaymentService,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use watcher::{InvoiceWatcher, ReconcileReport, WatcherError};

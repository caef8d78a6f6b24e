//! # Crypto payment engine public API
//!
//! * [`payment_service`] records payments against invoices and keeps their accounted flags current. The watcher is
//!   its main client.
//! * [`invoice_flow_api`] is the operator-facing API: invoice creation, queries and manual overrides.
//!
//! As with the rest of the crate, an API instance is created by supplying a backend that implements the required
//! traits:
//!
//! ```rust,ignore
//! use crypto_payment_engine::{InvoiceFlowApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! // SqliteDatabase implements both InvoiceRepository and ExchangeRates
//! let api = InvoiceFlowApi::new(db.clone(), db, PaymentMethodHandlers::default(), producers);
//! let invoice = api.fetch_invoice(&id).await?;
//! ```
pub mod errors;
pub mod exchange_objects;
pub mod invoice_flow_api;
pub mod invoice_objects;
pub mod payment_service;

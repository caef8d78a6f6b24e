//! SQLite storage for the crypto payment engine.
//!
//! [`SqliteDatabase`] implements [`crate::traits::InvoiceRepository`] and [`crate::traits::ExchangeRates`]. The
//! low-level queries live in [`db`].
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;

//! Shared building blocks for the crypto payment gateway crates.
mod amount;

pub mod helpers;
pub mod op;

pub use amount::{Amount, AmountConversionError, DEFAULT_DIVISIBILITY, MAX_DIVISIBILITY};
pub use helpers::{env_var_parsed, parse_boolean_flag};

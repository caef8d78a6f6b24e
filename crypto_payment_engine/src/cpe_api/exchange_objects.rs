use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db_types::ConversionError;

/// A crypto asset quoted in a (usually fiat) currency, e.g. `BTC_USD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub crypto: String,
    pub fiat: String,
}

impl CurrencyPair {
    pub fn new<S: AsRef<str>>(crypto: S, fiat: S) -> Self {
        Self { crypto: crypto.as_ref().to_ascii_uppercase(), fiat: fiat.as_ref().to_ascii_uppercase() }
    }
}

impl Display for CurrencyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.crypto, self.fiat)
    }
}

impl FromStr for CurrencyPair {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(['_', '/']) {
            Some((crypto, fiat)) if !crypto.is_empty() && !fiat.is_empty() => Ok(Self::new(crypto, fiat)),
            _ => Err(ConversionError(format!("Invalid currency pair: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRate {
    pub pair: CurrencyPair,
    /// What a buyer pays for one unit of the crypto asset, in the quote currency.
    pub bid: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeRate {
    pub fn new(pair: CurrencyPair, bid: Decimal, updated_at: Option<DateTime<Utc>>) -> Self {
        let updated_at = updated_at.unwrap_or_else(Utc::now);
        Self { pair, bid, updated_at }
    }
}

impl Display for ExchangeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "1 {} => {} {}", self.pair.crypto, self.bid, self.pair.fiat)
    }
}

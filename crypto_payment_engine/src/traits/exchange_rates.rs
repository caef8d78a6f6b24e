use std::future::Future;

use thiserror::Error;

use crate::cpe_api::exchange_objects::{CurrencyPair, ExchangeRate};

#[derive(Debug, Clone, Error)]
pub enum ExchangeRateError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("The requested exchange rate does not exist: {0}")]
    RateDoesNotExist(String),
}

impl From<sqlx::Error> for ExchangeRateError {
    fn from(e: sqlx::Error) -> Self {
        ExchangeRateError::DatabaseError(e.to_string())
    }
}

pub trait ExchangeRates: Clone + Send + Sync + 'static {
    /// Fetch the latest bid rate for the given pair. If the rate does not exist, the error
    /// [`ExchangeRateError::RateDoesNotExist`] is returned.
    fn fetch_bid_rate(&self, pair: &CurrencyPair) -> impl Future<Output = Result<ExchangeRate, ExchangeRateError>> + Send;

    /// Save the exchange rate to the backend storage
    fn set_exchange_rate(&self, rate: &ExchangeRate) -> impl Future<Output = Result<(), ExchangeRateError>> + Send;
}

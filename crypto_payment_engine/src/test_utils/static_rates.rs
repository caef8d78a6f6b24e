use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use rust_decimal::Decimal;

use crate::{
    cpe_api::exchange_objects::{CurrencyPair, ExchangeRate},
    traits::{ExchangeRateError, ExchangeRates},
};

/// Exchange rates held in memory.
#[derive(Clone, Default)]
pub struct StaticRates {
    rates: Arc<Mutex<HashMap<String, ExchangeRate>>>,
}

impl StaticRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(self, crypto: &str, fiat: &str, bid: Decimal) -> Self {
        let rate = ExchangeRate::new(CurrencyPair::new(crypto, fiat), bid, None);
        self.rates.lock().expect("rates lock poisoned").insert(rate.pair.to_string(), rate);
        self
    }
}

impl ExchangeRates for StaticRates {
    async fn fetch_bid_rate(&self, pair: &CurrencyPair) -> Result<ExchangeRate, ExchangeRateError> {
        let rates = self.rates.lock().expect("rates lock poisoned");
        rates.get(&pair.to_string()).cloned().ok_or_else(|| ExchangeRateError::RateDoesNotExist(pair.to_string()))
    }

    async fn set_exchange_rate(&self, rate: &ExchangeRate) -> Result<(), ExchangeRateError> {
        self.rates.lock().expect("rates lock poisoned").insert(rate.pair.to_string(), rate.clone());
        Ok(())
    }
}

use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::*;
use rust_decimal::Decimal;
use sqlx::SqliteConnection;

use crate::{
    cpe_api::exchange_objects::{CurrencyPair, ExchangeRate},
    traits::ExchangeRateError,
};

pub async fn fetch_last_rate(pair: &CurrencyPair, conn: &mut SqliteConnection) -> Result<ExchangeRate, ExchangeRateError> {
    let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT bid, updated_at FROM exchange_rates WHERE pair = $1 ORDER BY updated_at DESC, id DESC LIMIT 1",
    )
    .bind(pair.to_string())
    .fetch_optional(conn)
    .await?;
    let (bid, updated_at) = row.ok_or_else(|| ExchangeRateError::RateDoesNotExist(pair.to_string()))?;
    let bid = Decimal::from_str(&bid).map_err(|e| ExchangeRateError::DatabaseError(format!("Invalid bid for {pair}: {e}")))?;
    Ok(ExchangeRate::new(pair.clone(), bid, Some(updated_at)))
}

pub async fn set_exchange_rate(rate: &ExchangeRate, conn: &mut SqliteConnection) -> Result<(), ExchangeRateError> {
    sqlx::query("INSERT INTO exchange_rates (pair, bid, updated_at) VALUES ($1, $2, $3)")
        .bind(rate.pair.to_string())
        .bind(rate.bid.to_string())
        .bind(rate.updated_at)
        .execute(conn)
        .await?;
    debug!("🗃️ Exchange rate for {} set to {}", rate.pair, rate.bid);
    Ok(())
}

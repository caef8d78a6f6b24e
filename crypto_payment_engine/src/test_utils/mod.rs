//! Helpers for tests that need a database, a chain or exchange rates.
pub mod mock_chain;
pub mod prepare_env;
pub mod static_rates;

use rust_decimal::Decimal;

use crate::{
    cpe_api::invoice_objects::{NewInvoice, NewPaymentMethod},
    db_types::{PaymentMethodId, SpeedPolicy},
    payment_methods::{BitcoinLikeDetails, NetworkFeeMode, PaymentMethodDetails},
};

/// An invoice priced in BTC, payable on chain to `address`, with no network fees charged.
pub fn btc_invoice(price: Decimal, address: &str, derivation_strategy: &str, speed: SpeedPolicy) -> NewInvoice {
    let details = BitcoinLikeDetails::new(address, derivation_strategy, Decimal::ONE)
        .with_network_fee_mode(NetworkFeeMode::Never);
    NewInvoice::new("test_store", price, "BTC")
        .with_speed_policy(speed)
        .with_method(NewPaymentMethod::new(PaymentMethodId::on_chain("BTC"), PaymentMethodDetails::BitcoinLike(details)))
}

use std::str::FromStr;

use chrono::{Duration, Utc};
use crypto_payment_engine::{db_types::SpeedPolicy, test_utils::btc_invoice};
use cucumber::given;
use rust_decimal::Decimal;

use crate::{
    cucumber::InvoiceWorld,
    support::{TestSystem, WALLET},
};

#[given("a fresh install")]
async fn fresh_database(world: &mut InvoiceWorld) {
    world.system = Some(TestSystem::new().await);
}

#[given(expr = "invoice {word} for {word} BTC paid to {word} at {word} speed")]
async fn new_invoice(world: &mut InvoiceWorld, name: String, price: String, address: String, speed: String) {
    create_invoice(world, name, price, address, speed, None).await;
}

#[given(expr = "invoice {word} for {word} BTC paid to {word} at {word} speed, created {int} minutes ago")]
async fn old_invoice(world: &mut InvoiceWorld, name: String, price: String, address: String, speed: String, age: i64) {
    create_invoice(world, name, price, address, speed, Some(age)).await;
}

async fn create_invoice(
    world: &mut InvoiceWorld,
    name: String,
    price: String,
    address: String,
    speed: String,
    age: Option<i64>,
) {
    let price = Decimal::from_str(&price).expect("Invalid price");
    let speed = SpeedPolicy::from_str(&speed).expect("Invalid speed policy");
    let mut request = btc_invoice(price, &address, WALLET, speed).with_monitoring(Duration::minutes(60));
    if let Some(minutes) = age {
        request = request.with_invoice_time(Utc::now() - Duration::minutes(minutes));
    }
    let invoice = world.system().api.create_invoice(request).await.expect("Error creating invoice");
    world.invoices.insert(name, invoice.id);
}

#[given(expr = "the wallet hands out {word} next")]
async fn queue_address(world: &mut InvoiceWorld, address: String) {
    world.system().chain.queue_address(WALLET, &address);
}

use std::str::FromStr;

use cpg_common::Amount;
use crypto_payment_engine::{
    db_types::{InvoiceExceptionStatus, InvoiceStatus},
    events::EventType,
    traits::InvoiceRepository,
    InvoiceFlowError,
};
use cucumber::{then, when};
use rust_decimal::Decimal;

use crate::{cucumber::InvoiceWorld, support::WALLET};

#[when(expr = "{word} BTC is sent to {word} in transaction {word}")]
async fn send_payment(world: &mut InvoiceWorld, value: String, address: String, txid: String) {
    let value = Decimal::from_str(&value).expect("Invalid amount");
    world.system().chain.pay(WALLET, &address, &txid, Amount::new(value), 0, false);
}

#[when(expr = "{word} BTC is sent to {word} in replaceable transaction {word}")]
async fn send_rbf_payment(world: &mut InvoiceWorld, value: String, address: String, txid: String) {
    let value = Decimal::from_str(&value).expect("Invalid amount");
    world.system().chain.pay(WALLET, &address, &txid, Amount::new(value), 0, true);
}

#[when(expr = "transaction {word} has {int} confirmations")]
async fn confirm(world: &mut InvoiceWorld, txid: String, confirmations: i64) {
    world.system().chain.set_confirmations(&txid, confirmations);
}

#[when(expr = "{int} blocks are mined")]
async fn mine(world: &mut InvoiceWorld, blocks: usize) {
    for _ in 0..blocks {
        world.system().chain.mine_block();
    }
}

#[when(expr = "invoice {word} is reconciled")]
async fn reconcile(world: &mut InvoiceWorld, name: String) {
    let id = world.invoice_id(&name);
    world.system().watcher.reconcile_invoice(&id).await.expect("Error reconciling invoice");
}

#[when(expr = "the operator marks invoice {word} as {word}")]
async fn mark(world: &mut InvoiceWorld, name: String, status: String) {
    let id = world.invoice_id(&name);
    let status = InvoiceStatus::from_str(&status).expect("Invalid status");
    world.last_error = world.system().api.mark_invoice_status(&id, status).await.err();
}

#[when(expr = "the operator refunds invoice {word}")]
async fn refund(world: &mut InvoiceWorld, name: String) {
    let id = world.invoice_id(&name);
    world.last_error = world.system().api.begin_refund(&id).await.err();
}

#[then(expr = "invoice {word} is {word} with exception {word}")]
async fn check_state(world: &mut InvoiceWorld, name: String, status: String, exception: String) {
    let id = world.invoice_id(&name);
    let invoice = world.system().db.get_invoice(&id, false).await.expect("Error fetching invoice").expect("No invoice");
    assert_eq!(invoice.status, InvoiceStatus::from_str(&status).expect("Invalid status"));
    assert_eq!(invoice.exception_status, InvoiceExceptionStatus::from_str(&exception).expect("Invalid exception"));
}

#[then(expr = "invoice {word} asks to be paid at {word}")]
async fn check_address(world: &mut InvoiceWorld, name: String, address: String) {
    let id = world.invoice_id(&name);
    let invoice = world.system().db.get_invoice(&id, false).await.expect("Error fetching invoice").expect("No invoice");
    assert_eq!(invoice.payment_methods[0].details.destination(), address);
}

#[then(expr = "invoice {word} is watched")]
async fn is_watched(world: &mut InvoiceWorld, name: String) {
    let id = world.invoice_id(&name);
    assert!(world.system().db.get_pending_invoice_ids().await.expect("Error fetching ids").contains(&id));
}

#[then(expr = "invoice {word} is no longer watched")]
async fn is_not_watched(world: &mut InvoiceWorld, name: String) {
    let id = world.invoice_id(&name);
    assert!(!world.system().db.get_pending_invoice_ids().await.expect("Error fetching ids").contains(&id));
}

#[then(expr = "invoice {word} has {word} BTC outstanding")]
async fn check_due(world: &mut InvoiceWorld, name: String, due: String) {
    let id = world.invoice_id(&name);
    let accounting = world.system().api.invoice_accounting(&id).await.expect("Error fetching accounting");
    assert_eq!(accounting.methods[0].due, Decimal::from_str(&due).expect("Invalid amount"));
}

#[then("the operator action is rejected")]
async fn rejected(world: &mut InvoiceWorld) {
    assert!(matches!(world.last_error, Some(InvoiceFlowError::ConflictingState { .. })), "{:?}", world.last_error);
}

#[then("the operator action succeeds")]
async fn accepted(world: &mut InvoiceWorld) {
    assert!(world.last_error.is_none(), "{:?}", world.last_error);
}

#[then(expr = "{int} payment settled event(s) have/has been published")]
async fn settled_events(world: &mut InvoiceWorld, count: usize) {
    let events = world.system().events().await;
    let settled = events.iter().filter(|e| matches!(e, EventType::PaymentSettled(_))).count();
    assert_eq!(settled, count);
}

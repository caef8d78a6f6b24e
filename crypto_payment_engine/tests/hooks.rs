use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use cpg_common::Amount;
use crypto_payment_engine::{
    db_types::{InvoiceStatus, SpeedPolicy},
    events::{EventHandlers, EventHooks, EventType},
    payment_methods::PaymentMethodHandlers,
    test_utils::{
        btc_invoice,
        mock_chain::MockChainClient,
        prepare_env::{drop_database, prepare_test_env, random_db_path},
        static_rates::StaticRates,
    },
    traits::InvoiceRepository,
    InvoiceFlowApi,
    InvoiceWatcher,
    SqliteDatabase,
    WatcherConfig,
};
use log::*;
use rust_decimal_macros::dec;

mod support;

use support::{TestSystem, WALLET};

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::Relaxed)
    }
}

#[tokio::test]
async fn status_changes_are_published_in_order() {
    let sys = TestSystem::new().await;
    let invoice = sys.api.create_invoice(btc_invoice(dec!(1), "addr-1", WALLET, SpeedPolicy::HighSpeed)).await.unwrap();
    sys.chain.pay(WALLET, "addr-1", "tx1", Amount::from(1), 0, false);
    sys.watcher.reconcile_invoice(&invoice.id).await.unwrap();

    let names = sys
        .events()
        .await
        .into_iter()
        .map(|e| match e {
            EventType::InvoiceStatusChanged(ev) => format!("status:{}", ev.new_state.status),
            EventType::InvoiceDataChanged(_) => "data".to_string(),
            EventType::InvoiceNeedUpdate(_) => "need_update".to_string(),
            EventType::PaymentSettled(_) => "settled".to_string(),
            EventType::PaymentReceived(_) => "received".to_string(),
            EventType::InvoiceNewAddress(_) => "new_address".to_string(),
            EventType::InvoiceStopWatched(_) => "stop".to_string(),
        })
        .collect::<Vec<_>>();
    assert_eq!(names, vec![
        "data",
        "need_update",
        "received",
        "settled",
        "data",
        "status:paid",
        "status:confirmed"
    ]);
    sys.tear_down().await;
}

#[tokio::test]
async fn hooks_fire_once_per_transition() {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let chain = MockChainClient::new();

    let status_changes = HookCalled::default();
    let stopped = HookCalled::default();
    let mut hooks = EventHooks::default();
    let counter = status_changes.clone();
    hooks.on_invoice_status_changed(move |ev| {
        info!("🪝️ Invoice [{}] went from {} to {}", ev.invoice_id, ev.old_state, ev.new_state);
        counter.called();
        Box::pin(async {}) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let counter = stopped.clone();
    hooks.on_invoice_stop_watched(move |_| {
        counter.called();
        Box::pin(async {}) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let handlers = EventHandlers::new(10, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let payment_methods = PaymentMethodHandlers::default();
    let api = InvoiceFlowApi::new(db.clone(), StaticRates::new(), payment_methods.clone(), producers.clone());
    let watcher = InvoiceWatcher::new(db.clone(), chain.clone(), payment_methods, producers, WatcherConfig::default());

    let invoice = api.create_invoice(btc_invoice(dec!(1), "addr-1", "xpub", SpeedPolicy::LowSpeed)).await.unwrap();
    chain.pay("xpub", "addr-1", "tx1", Amount::from(1), 1, false);
    watcher.reconcile_invoice(&invoice.id).await.unwrap();
    for _ in 0..5 {
        chain.mine_block();
        watcher.reconcile_invoice(&invoice.id).await.unwrap();
    }
    let invoice = db.get_invoice(&invoice.id, false).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Complete);

    tokio::time::sleep(Duration::from_millis(100)).await;
    // Paid, Confirmed, Complete
    assert_eq!(status_changes.count(), 3);
    assert_eq!(stopped.count(), 1);
    db.close().await;
    drop_database(&url).await;
}

#![allow(dead_code)]
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use crypto_payment_engine::{
    events::{EventHandlers, EventHooks, EventType},
    payment_methods::PaymentMethodHandlers,
    test_utils::{
        mock_chain::MockChainClient,
        prepare_env::{drop_database, prepare_test_env, random_db_path},
        static_rates::StaticRates,
    },
    traits::InvoiceRepository,
    InvoiceFlowApi,
    InvoiceWatcher,
    PaymentService,
    SqliteDatabase,
    WatcherConfig,
};
use log::*;

pub const WALLET: &str = "xpub-test";

/// Everything a test needs to drive invoices through their life cycle, wired to a fresh database.
pub struct TestSystem {
    pub url: String,
    pub db: SqliteDatabase,
    pub chain: MockChainClient,
    pub rates: StaticRates,
    pub api: InvoiceFlowApi<SqliteDatabase, StaticRates>,
    pub payments: PaymentService<SqliteDatabase>,
    pub watcher: InvoiceWatcher<SqliteDatabase, MockChainClient>,
    events: Arc<Mutex<Vec<EventType>>>,
}

impl TestSystem {
    pub async fn new() -> Self {
        Self::with_config(WatcherConfig::default()).await
    }

    pub async fn with_config(config: WatcherConfig) -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
        let chain = MockChainClient::new();
        let rates = StaticRates::new();
        let handlers = PaymentMethodHandlers::default();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut hooks = EventHooks::default();
        hooks.on_any_event(move |ev| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(ev);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let event_handlers = EventHandlers::new(config.event_buffer_size, hooks);
        let producers = event_handlers.producers();
        event_handlers.start_handlers().await;

        let api = InvoiceFlowApi::new(db.clone(), rates.clone(), handlers.clone(), producers.clone());
        let payments = PaymentService::new(db.clone(), handlers.clone(), producers.clone());
        let watcher = InvoiceWatcher::new(db.clone(), chain.clone(), handlers, producers, config);
        debug!("🚀️ Test system ready on {url}");
        Self { url, db, chain, rates, api, payments, watcher, events }
    }

    /// The events published so far, once the event handler has caught up.
    pub async fn events(&self) -> Vec<EventType> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.events.lock().unwrap().clone()
    }

    pub async fn clear_events(&self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.events.lock().unwrap().clear();
    }

    pub async fn tear_down(self) {
        self.watcher.shutdown();
        self.db.close().await;
        drop_database(self.db.url()).await;
        trace!("🚀️ Removed {}", self.url);
    }
}

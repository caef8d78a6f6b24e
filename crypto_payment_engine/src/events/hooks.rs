use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    EventType,
    Handler,
    InvoiceDataChangedEvent,
    InvoiceNeedUpdateEvent,
    InvoiceNewAddressEvent,
    InvoiceStatusChangedEvent,
    InvoiceStopWatchedEvent,
    PaymentReceivedEvent,
    PaymentSettledEvent,
};

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

//--------------------------------------    EventProducers     ---------------------------------------------------------
/// The publishing side of the event bus. Cheap to clone; every component that emits events holds a copy.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub invoice_status_changed_producer: Vec<EventProducer<InvoiceStatusChangedEvent>>,
    pub invoice_data_changed_producer: Vec<EventProducer<InvoiceDataChangedEvent>>,
    pub invoice_need_update_producer: Vec<EventProducer<InvoiceNeedUpdateEvent>>,
    pub payment_settled_producer: Vec<EventProducer<PaymentSettledEvent>>,
    pub payment_received_producer: Vec<EventProducer<PaymentReceivedEvent>>,
    pub invoice_new_address_producer: Vec<EventProducer<InvoiceNewAddressEvent>>,
    pub invoice_stop_watched_producer: Vec<EventProducer<InvoiceStopWatchedEvent>>,
    /// Receives every event, wrapped in [`EventType`], in publication order.
    pub any_event_producer: Vec<EventProducer<EventType>>,
}

async fn publish<E: Clone + Send + Sync>(
    producers: &[EventProducer<E>],
    any: &[EventProducer<EventType>],
    event: E,
    wrap: fn(E) -> EventType,
) {
    for producer in producers {
        producer.publish_event(event.clone()).await;
    }
    for producer in any {
        producer.publish_event(wrap(event.clone())).await;
    }
}

impl EventProducers {
    pub async fn publish_invoice_status_changed(&self, event: InvoiceStatusChangedEvent) {
        publish(&self.invoice_status_changed_producer, &self.any_event_producer, event, EventType::InvoiceStatusChanged)
            .await;
    }

    pub async fn publish_invoice_data_changed(&self, event: InvoiceDataChangedEvent) {
        publish(&self.invoice_data_changed_producer, &self.any_event_producer, event, EventType::InvoiceDataChanged)
            .await;
    }

    pub async fn publish_invoice_need_update(&self, event: InvoiceNeedUpdateEvent) {
        publish(&self.invoice_need_update_producer, &self.any_event_producer, event, EventType::InvoiceNeedUpdate).await;
    }

    pub async fn publish_payment_settled(&self, event: PaymentSettledEvent) {
        publish(&self.payment_settled_producer, &self.any_event_producer, event, EventType::PaymentSettled).await;
    }

    pub async fn publish_payment_received(&self, event: PaymentReceivedEvent) {
        publish(&self.payment_received_producer, &self.any_event_producer, event, EventType::PaymentReceived).await;
    }

    pub async fn publish_invoice_new_address(&self, event: InvoiceNewAddressEvent) {
        publish(&self.invoice_new_address_producer, &self.any_event_producer, event, EventType::InvoiceNewAddress)
            .await;
    }

    pub async fn publish_invoice_stop_watched(&self, event: InvoiceStopWatchedEvent) {
        publish(&self.invoice_stop_watched_producer, &self.any_event_producer, event, EventType::InvoiceStopWatched)
            .await;
    }
}

//--------------------------------------     EventHandlers     ---------------------------------------------------------
pub struct EventHandlers {
    pub on_invoice_status_changed: Option<EventHandler<InvoiceStatusChangedEvent>>,
    pub on_invoice_data_changed: Option<EventHandler<InvoiceDataChangedEvent>>,
    pub on_invoice_need_update: Option<EventHandler<InvoiceNeedUpdateEvent>>,
    pub on_payment_settled: Option<EventHandler<PaymentSettledEvent>>,
    pub on_payment_received: Option<EventHandler<PaymentReceivedEvent>>,
    pub on_invoice_new_address: Option<EventHandler<InvoiceNewAddressEvent>>,
    pub on_invoice_stop_watched: Option<EventHandler<InvoiceStopWatchedEvent>>,
    pub on_any_event: Option<EventHandler<EventType>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let EventHooks {
            on_invoice_status_changed,
            on_invoice_data_changed,
            on_invoice_need_update,
            on_payment_settled,
            on_payment_received,
            on_invoice_new_address,
            on_invoice_stop_watched,
            on_any_event,
        } = hooks;
        Self {
            on_invoice_status_changed: on_invoice_status_changed.map(|f| EventHandler::new(buffer_size, f)),
            on_invoice_data_changed: on_invoice_data_changed.map(|f| EventHandler::new(buffer_size, f)),
            on_invoice_need_update: on_invoice_need_update.map(|f| EventHandler::new(buffer_size, f)),
            on_payment_settled: on_payment_settled.map(|f| EventHandler::new(buffer_size, f)),
            on_payment_received: on_payment_received.map(|f| EventHandler::new(buffer_size, f)),
            on_invoice_new_address: on_invoice_new_address.map(|f| EventHandler::new(buffer_size, f)),
            on_invoice_stop_watched: on_invoice_stop_watched.map(|f| EventHandler::new(buffer_size, f)),
            on_any_event: on_any_event.map(|f| EventHandler::new(buffer_size, f)),
        }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_invoice_status_changed {
            result.invoice_status_changed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_invoice_data_changed {
            result.invoice_data_changed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_invoice_need_update {
            result.invoice_need_update_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_settled {
            result.payment_settled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_received {
            result.payment_received_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_invoice_new_address {
            result.invoice_new_address_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_invoice_stop_watched {
            result.invoice_stop_watched_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_any_event {
            result.any_event_producer.push(handler.subscribe());
        }
        result
    }

    /// Spawns one task per registered hook. Each task ends once all producers for its event type are dropped.
    pub async fn start_handlers(self) {
        fn spawn<E: Send + Sync + 'static>(handler: Option<EventHandler<E>>) {
            if let Some(handler) = handler {
                tokio::spawn(async move {
                    handler.start_handler().await;
                });
            }
        }
        spawn(self.on_invoice_status_changed);
        spawn(self.on_invoice_data_changed);
        spawn(self.on_invoice_need_update);
        spawn(self.on_payment_settled);
        spawn(self.on_payment_received);
        spawn(self.on_invoice_new_address);
        spawn(self.on_invoice_stop_watched);
        spawn(self.on_any_event);
    }
}

//--------------------------------------      EventHooks       ---------------------------------------------------------
#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_invoice_status_changed: Option<Handler<InvoiceStatusChangedEvent>>,
    pub on_invoice_data_changed: Option<Handler<InvoiceDataChangedEvent>>,
    pub on_invoice_need_update: Option<Handler<InvoiceNeedUpdateEvent>>,
    pub on_payment_settled: Option<Handler<PaymentSettledEvent>>,
    pub on_payment_received: Option<Handler<PaymentReceivedEvent>>,
    pub on_invoice_new_address: Option<Handler<InvoiceNewAddressEvent>>,
    pub on_invoice_stop_watched: Option<Handler<InvoiceStopWatchedEvent>>,
    pub on_any_event: Option<Handler<EventType>>,
}

impl EventHooks {
    pub fn on_invoice_status_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoiceStatusChangedEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_invoice_status_changed = Some(Arc::new(f));
        self
    }

    pub fn on_invoice_data_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoiceDataChangedEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_invoice_data_changed = Some(Arc::new(f));
        self
    }

    pub fn on_invoice_need_update<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoiceNeedUpdateEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_invoice_need_update = Some(Arc::new(f));
        self
    }

    pub fn on_payment_settled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentSettledEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_payment_settled = Some(Arc::new(f));
        self
    }

    pub fn on_payment_received<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentReceivedEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_payment_received = Some(Arc::new(f));
        self
    }

    pub fn on_invoice_new_address<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoiceNewAddressEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_invoice_new_address = Some(Arc::new(f));
        self
    }

    pub fn on_invoice_stop_watched<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoiceStopWatchedEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_invoice_stop_watched = Some(Arc::new(f));
        self
    }

    pub fn on_any_event<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(EventType) -> BoxedFuture) + Send + Sync + 'static {
        self.on_any_event = Some(Arc::new(f));
        self
    }
}

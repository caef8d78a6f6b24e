//! Simple stateless pub-sub event handler
//!
//! This module provides a simple hook system that allows components of the system to subscribe to invoice events
//! and react to them. The event handler is stateless, i.e. the handlers have no access to the internal state of the
//! system. All that is received is the event itself.
//!
//! Handlers can be async. Events are handed to the handler one at a time, in the order they were published by any
//! single producer, so a subscriber never sees an invoice's status changes out of order.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::sync::mpsc;

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        Self { listener: receiver, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Runs until every producer has been dropped and the queue is drained.
    pub async fn start_handler(mut self) {
        debug!("📬️ Starting event handler");
        // drop the internal sender so that when the last subscriber is dropped, we can automatically shut down the
        // handler
        drop(self.sender);
        let mut handled = 0u64;
        while let Some(ev) = self.listener.recv().await {
            trace!("📬️ Handling event");
            (self.handler)(ev).await;
            handled += 1;
            trace!("📬️ Event handled");
        }
        debug!("📬️ Event handler has shut down after handling {handled} events");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ Failed to send event: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    };

    use super::*;

    #[tokio::test]
    async fn test_event_handler() {
        let _ = env_logger::try_init();
        let count = Arc::new(AtomicU64::new(0));
        let c2 = count.clone();
        let handler = Arc::new(move |v| {
            let count = count.clone();
            Box::pin(async move {
                debug!("Handler received {v}");
                let _ = count.fetch_add(v, Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let event_handler = EventHandler::new(1, handler);
        let producer_1 = event_handler.subscribe();
        let producer_2 = event_handler.subscribe();
        tokio::spawn(async move {
            for i in 0..5 {
                let v = i * 2 + 1;
                producer_1.publish_event(v).await;
                debug!("P1 publishing {v}");
            }
        });
        tokio::spawn(async move {
            for i in 0..5 {
                let v = i * 2;
                producer_2.publish_event(v).await;
                debug!("P2 publishing {v}");
            }
        });

        event_handler.start_handler().await;
        debug!("Handler done");
        assert_eq!(c2.load(Ordering::SeqCst), 45);
    }

    #[tokio::test]
    async fn events_from_one_producer_stay_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s2 = seen.clone();
        let handler = Arc::new(move |v: u32| {
            let seen = seen.clone();
            Box::pin(async move {
                // later events finish faster, which would reorder them if they were handled concurrently
                tokio::time::sleep(tokio::time::Duration::from_millis(u64::from(10 - v))).await;
                seen.lock().unwrap().push(v);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let event_handler = EventHandler::new(10, handler);
        let producer = event_handler.subscribe();
        tokio::spawn(async move {
            for v in 0..10 {
                producer.publish_event(v).await;
            }
        });
        event_handler.start_handler().await;
        assert_eq!(*s2.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}

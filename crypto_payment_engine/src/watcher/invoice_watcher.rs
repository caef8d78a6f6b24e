use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use log::*;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::WatcherConfig,
    cpe_api::payment_service::PaymentService,
    db_types::{Invoice, InvoiceExceptionStatus, InvoiceId, InvoiceLog, InvoiceStatus, PaymentMethodId},
    events::{
        EventProducers,
        InvoiceDataChangedEvent,
        InvoiceNeedUpdateEvent,
        InvoiceNewAddressEvent,
        InvoiceStatusChangedEvent,
        InvoiceStopWatchedEvent,
    },
    payment_methods::{BitcoinLikePaymentData, PaymentData, PaymentMethodHandlers},
    traits::{ChainClient, ChainClientError, ChainEvent, Changeset, InvoiceRepository, TransactionInfo},
    watcher::{double_spend, reconcile, ReconcileReport, WatcherError},
};

type ChangesetKey = (String, String);

/// `InvoiceWatcher` keeps pending invoices in step with the chain.
///
/// Work arrives as invoice ids on a queue, fed by a periodic sweep of the pending set, by [`ChainEvent`]s and by
/// [`InvoiceWatcher::watch`]. Each id is reconciled in its own task. An id that is queued while it is already being
/// reconciled is not run concurrently; the running task simply goes round once more when it is done.
///
/// The watcher is cheap to clone. All clones share the same queue and state.
pub struct InvoiceWatcher<R, C> {
    inner: Arc<WatcherState<R, C>>,
}

impl<R, C> Clone for InvoiceWatcher<R, C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<R, C> Debug for InvoiceWatcher<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InvoiceWatcher ({:?})", self.inner.config)
    }
}

struct WatcherState<R, C> {
    repo: R,
    chain: C,
    payments: PaymentService<R>,
    handlers: PaymentMethodHandlers,
    producers: EventProducers,
    config: WatcherConfig,
    cancel: CancellationToken,
    queue: mpsc::UnboundedSender<InvoiceId>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<InvoiceId>>>,
    /// Invoices being reconciled right now, and whether they were queued again in the meantime.
    running: Mutex<HashMap<InvoiceId, bool>>,
    /// Deferred re-checks that have been scheduled, by invoice.
    wakeups: Mutex<HashMap<InvoiceId, DateTime<Utc>>>,
    changesets: Mutex<HashMap<ChangesetKey, Changeset>>,
}

impl<R, C> InvoiceWatcher<R, C>
where
    R: InvoiceRepository,
    C: ChainClient,
{
    pub fn new(
        repo: R,
        chain: C,
        handlers: PaymentMethodHandlers,
        producers: EventProducers,
        config: WatcherConfig,
    ) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let payments = PaymentService::new(repo.clone(), handlers.clone(), producers.clone());
        let inner = WatcherState {
            repo,
            chain,
            payments,
            handlers,
            producers,
            config,
            cancel: CancellationToken::new(),
            queue,
            receiver: Mutex::new(Some(receiver)),
            running: Mutex::new(HashMap::new()),
            wakeups: Mutex::new(HashMap::new()),
            changesets: Mutex::new(HashMap::new()),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Fires when the watcher is shutting down. Child tokens can be handed to anything that should stop with it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Queues the invoice for reconciliation.
    pub fn watch(&self, id: InvoiceId) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.inner.queue.send(id) {
            warn!("👁️ Could not queue invoice [{}]. The watcher has stopped.", e.0);
        }
    }

    /// True while the invoice is being reconciled.
    pub async fn is_running(&self, id: &InvoiceId) -> bool {
        self.inner.running.lock().await.contains_key(id)
    }

    /// Starts the main loop. Do not await the returned handle before calling [`Self::shutdown`], as it runs until
    /// then.
    ///
    /// `chain_events`, if given, delivers block and output notifications from the chain-watching layer.
    pub fn start(&self, chain_events: Option<mpsc::Receiver<ChainEvent>>) -> JoinHandle<()> {
        let watcher = self.clone();
        tokio::spawn(async move { watcher.run(chain_events).await })
    }

    /// Stops the main loop. In-flight reconciliations get up to the configured grace period to finish.
    pub fn shutdown(&self) {
        info!("👁️ Invoice watcher is shutting down");
        self.inner.cancel.cancel();
    }

    async fn run(&self, mut chain_events: Option<mpsc::Receiver<ChainEvent>>) {
        let Some(mut queue) = self.inner.receiver.lock().await.take() else {
            error!("👁️ The invoice watcher has already been started");
            return;
        };
        let cancel = self.inner.cancel.clone();
        let mut timer = tokio::time::interval(self.inner.config.sweep_interval);
        info!("👁️ Invoice watcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(id) = queue.recv() => self.dispatch(id).await,
                _ = timer.tick() => self.sweep().await,
                event = next_chain_event(&mut chain_events) => match event {
                    Some(event) => self.on_chain_event(event).await,
                    None => {
                        debug!("👁️ The chain event feed has closed");
                        chain_events = None;
                    },
                },
            }
        }
        self.wait_for_running_jobs().await;
        info!("👁️ Invoice watcher stopped");
    }

    async fn wait_for_running_jobs(&self) {
        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_grace;
        loop {
            let count = self.inner.running.lock().await.len();
            if count == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("👁️ Giving up on {count} reconciliations that are still running");
                return;
            }
            trace!("👁️ Waiting for {count} reconciliations to finish");
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    async fn sweep(&self) {
        match self.inner.repo.get_pending_invoice_ids().await {
            Ok(ids) => {
                trace!("👁️ Sweeping {} pending invoices", ids.len());
                for id in ids {
                    self.watch(id);
                }
            },
            Err(e) => error!("👁️ Could not fetch the pending invoices. {e}"),
        }
    }

    async fn on_chain_event(&self, event: ChainEvent) {
        match event {
            ChainEvent::NewBlock { crypto_code } => {
                debug!("👁️ New {crypto_code} block. Checking every pending invoice");
                self.sweep().await;
            },
            ChainEvent::TxOutReceived { crypto_code, address } => {
                match self.inner.repo.find_invoice_by_address(&crypto_code, &address).await {
                    Ok(Some(id)) => {
                        debug!("👁️ Funds received on {address}, which belongs to invoice [{id}]");
                        self.watch(id);
                    },
                    Ok(None) => trace!("👁️ Funds received on {address}, which is not assigned to any invoice"),
                    Err(e) => error!("👁️ Could not look up the invoice of {crypto_code} address {address}. {e}"),
                }
            },
        }
    }

    async fn dispatch(&self, id: InvoiceId) {
        {
            let mut running = self.inner.running.lock().await;
            if let Some(rerun) = running.get_mut(&id) {
                trace!("👁️ Invoice [{id}] is already being reconciled. It will be checked again afterwards");
                *rerun = true;
                return;
            }
            running.insert(id.clone(), false);
        }
        let watcher = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = watcher.reconcile_invoice(&id).await {
                    watcher.on_failure(&id, e);
                }
                let again = {
                    let mut running = watcher.inner.running.lock().await;
                    let again = running.get(&id).copied().unwrap_or(false) && !watcher.inner.cancel.is_cancelled();
                    if again {
                        running.insert(id.clone(), false);
                    } else {
                        running.remove(&id);
                    }
                    again
                };
                if !again {
                    break;
                }
            }
        });
    }

    fn on_failure(&self, id: &InvoiceId, e: WatcherError) {
        if matches!(e, WatcherError::Chain(ChainClientError::Cancelled)) || self.inner.cancel.is_cancelled() {
            debug!("👁️ Reconciliation of invoice [{id}] was cancelled");
            return;
        }
        let delay = self.inner.config.retry_delay;
        error!("👁️ Reconciliation of invoice [{id}] failed. Trying again in {}s. {e}", delay.as_secs());
        let watcher = self.clone();
        let id = id.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = tokio::time::sleep(delay) => watcher.watch(id),
            }
        });
    }

    /// Reconciles the invoice with the chain and runs the state machine, repeating until nothing changes.
    ///
    /// Each round:
    /// 1. syncs the wallet of every on-chain payment method and records outputs paying to the invoice's addresses,
    /// 2. refreshes confirmations and resolves double spends,
    /// 3. runs the state machine,
    /// 4. persists the new state, provided nobody else changed it since it was loaded,
    /// 5. hands out a fresh deposit address if a partial payment arrived on the current one,
    /// 6. publishes the events,
    /// 7. stops watching the invoice once it is terminal.
    ///
    /// This does not coordinate with the queue. Concurrent calls for the same invoice must be avoided by the caller;
    /// the main loop does that for queued invoices. Writes from elsewhere (operator marks) are detected when the
    /// new state is persisted, and the round is started over.
    pub async fn reconcile_invoice(&self, id: &InvoiceId) -> Result<ReconcileReport, WatcherError> {
        let state = &self.inner;
        let mut report = ReconcileReport::default();
        for _ in 0..state.config.max_reconcile_rounds {
            report.rounds += 1;
            let Some(invoice) = state.repo.get_invoice(id, true).await? else {
                debug!("👁️ Invoice [{id}] does not exist. Nothing to do");
                report.missing = true;
                return Ok(report);
            };
            let (recorded, dirty) = self.record_new_payments(&invoice).await?;
            report.new_payments += recorded;
            let updated = self.refresh_transactions(&invoice).await?;
            report.updated_payments += updated;
            let mut invoice = if recorded + updated > 0 {
                state.repo.get_invoice(id, true).await?.ok_or_else(|| WatcherError::InvoiceDisappeared(id.clone()))?
            } else {
                invoice
            };

            let now = Utc::now();
            let loaded = invoice.state();
            let mut outcome = reconcile::update_invoice(&mut invoice, &state.handlers, now)?;
            let rotate = matches!(invoice.status, InvoiceStatus::New | InvoiceStatus::Expired)
                && invoice.exception_status == InvoiceExceptionStatus::PaidPartial
                && !dirty.is_empty();

            if (outcome.changed() || rotate) && !state.repo.transition_invoice_status(id, loaded, invoice.state()).await? {
                warn!("👁️ Invoice [{id}] was changed while it was being reconciled. Starting over");
                report.conflicts += 1;
                continue;
            }
            if outcome.unaffect_address {
                state.repo.unaffect_address(id).await?;
            }
            let mut rotated = vec![];
            if rotate {
                for method_id in &dirty {
                    let address = self.rotate_address(&invoice, method_id).await?;
                    outcome.logs.push(InvoiceLog::info(format!("New address {address} generated for {method_id}")));
                    rotated.push((method_id.clone(), address));
                }
            }
            state.repo.add_invoice_logs(id, &outcome.logs).await?;
            for (payment_method_id, address) in &rotated {
                let event = InvoiceNewAddressEvent::new(id.clone(), payment_method_id.clone(), address.clone());
                state.producers.publish_invoice_new_address(event).await;
            }
            if outcome.changed() {
                let event = InvoiceDataChangedEvent::new(id.clone(), invoice.state());
                state.producers.publish_invoice_data_changed(event).await;
                for t in &outcome.transitions {
                    info!("👁️ Invoice [{id}] is now {}. It was {}", t.to, t.from);
                    let event = InvoiceStatusChangedEvent::new(id.clone(), t.from, t.to);
                    state.producers.publish_invoice_status_changed(event).await;
                }
            }

            let changed = recorded + updated > 0 || outcome.changed() || !rotated.is_empty();
            report.transitions.extend(outcome.transitions);
            report.new_addresses.extend(rotated.into_iter().map(|(_, a)| a));
            if outcome.stop_watching {
                self.stop_watching(&invoice).await?;
                report.stopped_watching = true;
                break;
            }
            if !changed {
                self.schedule_recheck(&invoice, now).await;
                break;
            }
        }
        Ok(report)
    }

    /// Records every output of the invoice's wallets that pays to one of its addresses and is not yet known.
    ///
    /// Returns the number of new payments, and the payment methods whose current deposit address received one.
    async fn record_new_payments(
        &self,
        invoice: &Invoice,
    ) -> Result<(usize, HashSet<PaymentMethodId>), WatcherError> {
        let state = &self.inner;
        let mut count = 0;
        let mut dirty = HashSet::new();
        let recorded = invoice.payments.iter().map(|p| p.id.as_str()).collect::<HashSet<_>>();
        for method in &invoice.payment_methods {
            let Some(details) = method.details.as_bitcoin() else { continue };
            if !state.handlers.supports(&method.id) {
                continue;
            }
            let crypto_code = method.id.crypto_code.as_str();
            let changeset = self.sync(crypto_code, &details.derivation_strategy).await?;
            let known = invoice.known_addresses(crypto_code);
            let fresh = changeset
                .utxos()
                .filter(|u| known.contains(u.address.as_str()) && !recorded.contains(u.outpoint.to_string().as_str()));
            for utxo in fresh {
                let mut data = BitcoinLikePaymentData::new(utxo.outpoint.clone(), utxo.address.as_str(), utxo.value)
                    .with_confirmations(utxo.confirmations)
                    .with_rbf(utxo.rbf);
                data.key_path = utxo.key_path.clone();
                let data = PaymentData::BitcoinLike(data);
                let payment = state.payments.add_payment(&invoice.id, utxo.timestamp, data, crypto_code, true).await?;
                if payment.is_some() {
                    count += 1;
                    if utxo.address == details.deposit_address {
                        dirty.insert(method.id.clone());
                    }
                }
            }
        }
        Ok((count, dirty))
    }

    async fn sync(&self, crypto_code: &str, derivation_strategy: &str) -> Result<Changeset, WatcherError> {
        let state = &self.inner;
        let key = (crypto_code.to_string(), derivation_strategy.to_string());
        let previous = state.changesets.lock().await.get(&key).cloned();
        let changeset = state
            .chain
            .sync(crypto_code, derivation_strategy, previous.as_ref(), state.config.long_poll, &state.cancel)
            .await?;
        state.changesets.lock().await.insert(key, changeset.clone());
        Ok(changeset)
    }

    /// Pulls the transactions behind the invoice's on-chain payments and persists whatever changed about them.
    async fn refresh_transactions(&self, invoice: &Invoice) -> Result<usize, WatcherError> {
        let state = &self.inner;
        let mut transactions = HashMap::<String, TransactionInfo>::new();
        let mut crypto_codes = invoice
            .payments
            .iter()
            .filter(|p| p.data.as_bitcoin().is_some())
            .map(|p| &p.payment_method_id.crypto_code)
            .collect::<Vec<_>>();
        crypto_codes.sort();
        crypto_codes.dedup();
        for crypto_code in crypto_codes {
            let payments = invoice
                .payments
                .iter()
                .filter(|p| &p.payment_method_id.crypto_code == crypto_code)
                .cloned()
                .collect::<Vec<_>>();
            let txids = double_spend::payment_txids(&payments);
            if txids.is_empty() {
                continue;
            }
            transactions.extend(state.chain.get_transactions(crypto_code, &txids).await?);
        }
        let changed = double_spend::refresh_payments(&invoice.payments, &transactions, &state.handlers);
        if changed.is_empty() {
            return Ok(0);
        }
        for p in changed.iter().filter(|p| !p.accounted) {
            warn!("👁️ Payment {} on invoice [{}] was double spent and no longer counts", p.id, invoice.id);
        }
        let updated = state.payments.update_payments(&changed).await?;
        Ok(updated.len())
    }

    async fn rotate_address(&self, invoice: &Invoice, method_id: &PaymentMethodId) -> Result<String, WatcherError> {
        let state = &self.inner;
        let mut method = invoice
            .payment_method(method_id)
            .cloned()
            .ok_or_else(|| WatcherError::InvoiceDisappeared(invoice.id.clone()))?;
        let Some(details) = method.details.as_bitcoin_mut() else {
            return Err(WatcherError::InvoiceDisappeared(invoice.id.clone()));
        };
        let reserved = state.chain.reserve_address(&method_id.crypto_code, &details.derivation_strategy).await?;
        details.deposit_address = reserved.address.clone();
        details.key_path = reserved.key_path;
        state.repo.update_payment_method(&invoice.id, &method).await?;
        state.repo.new_address(&invoice.id, method_id, &reserved.address).await?;
        info!("👁️ Invoice [{}] was partially paid. New {method_id} address {} issued", invoice.id, reserved.address);
        Ok(reserved.address)
    }

    async fn stop_watching(&self, invoice: &Invoice) -> Result<(), WatcherError> {
        let state = &self.inner;
        state.wakeups.lock().await.remove(&invoice.id);
        if state.repo.remove_pending_invoice(&invoice.id).await? {
            info!("👁️ Invoice [{}] is {} and is no longer watched", invoice.id, invoice.state());
            state.producers.publish_invoice_stop_watched(InvoiceStopWatchedEvent::new(invoice.id.clone())).await;
        }
        Ok(())
    }

    /// Makes sure the invoice is looked at again when it is due to expire, or when its monitoring window closes.
    async fn schedule_recheck(&self, invoice: &Invoice, now: DateTime<Utc>) {
        let Some(when) = reconcile::next_check(invoice, now) else {
            return;
        };
        {
            let mut wakeups = self.inner.wakeups.lock().await;
            if wakeups.get(&invoice.id) == Some(&when) {
                return;
            }
            wakeups.insert(invoice.id.clone(), when);
        }
        trace!("👁️ Invoice [{}] will be checked again at {when}", invoice.id);
        let delay = (when - now).to_std().unwrap_or_default();
        let watcher = self.clone();
        let id = invoice.id.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = tokio::time::sleep(delay) => {
                    let due = {
                        let mut wakeups = watcher.inner.wakeups.lock().await;
                        let due = wakeups.get(&id) == Some(&when);
                        if due {
                            wakeups.remove(&id);
                        }
                        due
                    };
                    if due {
                        watcher.inner.producers.publish_invoice_need_update(InvoiceNeedUpdateEvent::new(id.clone())).await;
                        watcher.watch(id);
                    }
                },
            }
        });
    }
}

async fn next_chain_event(events: &mut Option<mpsc::Receiver<ChainEvent>>) -> Option<ChainEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

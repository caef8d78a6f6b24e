use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Utc;
use cpg_common::Amount;
use log::*;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    payment_methods::OutPoint,
    traits::{ChainClient, ChainClientError, Changeset, ReservedAddress, TransactionInfo, Utxo},
};

#[derive(Default)]
struct MockChainState {
    /// UTXOs by derivation strategy
    utxos: HashMap<String, Vec<Utxo>>,
    transactions: HashMap<String, TransactionInfo>,
    addresses: HashMap<String, VecDeque<String>>,
    address_counter: u64,
    failing_syncs: usize,
    sync_calls: usize,
    held: bool,
    syncs_in_flight: usize,
    max_syncs_in_flight: usize,
}

/// A scriptable, in-memory chain.
///
/// Payments are added with [`MockChainClient::pay`]. Every transaction spends a single made-up input unless told
/// otherwise with [`MockChainClient::set_inputs`]. Syncs can be held at the door with [`MockChainClient::hold_syncs`]
/// to freeze a reconciliation half-way.
#[derive(Clone, Default)]
pub struct MockChainClient {
    state: Arc<Mutex<MockChainState>>,
    released: Arc<Notify>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockChainState> {
        self.state.lock().expect("mock chain lock poisoned")
    }

    /// Sends `value` to `address` of the wallet `derivation_strategy` in the transaction `txid`.
    pub fn pay(&self, derivation_strategy: &str, address: &str, txid: &str, value: Amount, confirmations: i64, rbf: bool) {
        let now = Utc::now();
        let utxo = Utxo {
            outpoint: OutPoint::new(txid, 0),
            address: address.to_string(),
            value,
            key_path: None,
            confirmations,
            rbf,
            timestamp: now,
        };
        let mut state = self.state();
        state.utxos.entry(derivation_strategy.to_string()).or_default().push(utxo);
        state.transactions.entry(txid.to_string()).or_insert_with(|| TransactionInfo {
            txid: txid.to_string(),
            confirmations,
            inputs: vec![OutPoint::new(format!("{txid}-funding"), 0)],
            rbf,
            timestamp: now,
        });
        debug!("⛓️ Mock chain: {value} paid to {address} in {txid}");
    }

    pub fn set_confirmations(&self, txid: &str, confirmations: i64) {
        let mut state = self.state();
        if let Some(tx) = state.transactions.get_mut(txid) {
            tx.confirmations = confirmations;
        }
        for utxo in state.utxos.values_mut().flatten().filter(|u| u.outpoint.txid == txid) {
            utxo.confirmations = confirmations;
        }
    }

    /// Mines a block: every known transaction gains a confirmation, unless it has been evicted.
    pub fn mine_block(&self) {
        let mut state = self.state();
        for tx in state.transactions.values_mut().filter(|t| t.confirmations >= 0) {
            tx.confirmations += 1;
        }
        for utxo in state.utxos.values_mut().flatten().filter(|u| u.confirmations >= 0) {
            utxo.confirmations += 1;
        }
    }

    pub fn set_inputs(&self, txid: &str, inputs: Vec<OutPoint>) {
        if let Some(tx) = self.state().transactions.get_mut(txid) {
            tx.inputs = inputs;
        }
    }

    /// Makes `reserve_address` hand out `address` next for the wallet.
    pub fn queue_address(&self, derivation_strategy: &str, address: &str) {
        self.state().addresses.entry(derivation_strategy.to_string()).or_default().push_back(address.to_string());
    }

    /// The next `count` syncs fail with a transient error.
    pub fn fail_next_syncs(&self, count: usize) {
        self.state().failing_syncs = count;
    }

    /// Number of syncs that got past the door.
    pub fn sync_calls(&self) -> usize {
        self.state().sync_calls
    }

    /// Syncs wait until [`Self::release_syncs`] is called.
    pub fn hold_syncs(&self) {
        self.state().held = true;
    }

    pub fn release_syncs(&self) {
        self.state().held = false;
        self.released.notify_waiters();
    }

    /// Syncs that have started and not returned yet, held ones included.
    pub fn syncs_in_flight(&self) -> usize {
        self.state().syncs_in_flight
    }

    /// The most syncs that were ever in flight at the same time.
    pub fn max_concurrent_syncs(&self) -> usize {
        self.state().max_syncs_in_flight
    }

    async fn wait_until_released(&self, cancel: &CancellationToken) -> Result<(), ChainClientError> {
        loop {
            let released = self.released.notified();
            if !self.state().held {
                return Ok(());
            }
            trace!("⛓️ Mock chain: sync is being held");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ChainClientError::Cancelled),
                _ = released => {},
            }
        }
    }

    fn sync_now(&self, derivation_strategy: &str, previous: Option<&Changeset>) -> Result<Changeset, ChainClientError> {
        let mut state = self.state();
        state.sync_calls += 1;
        if state.failing_syncs > 0 {
            state.failing_syncs -= 1;
            return Err(ChainClientError::Transient("mock chain is unavailable".into()));
        }
        let utxos = state.utxos.get(derivation_strategy).cloned().unwrap_or_default();
        let (confirmed, unconfirmed) = utxos.into_iter().partition(|u| u.confirmations > 0);
        let cursor = Some(format!("{}-{}", previous.and_then(|p| p.cursor.as_deref()).unwrap_or("0"), state.sync_calls));
        Ok(Changeset { derivation_strategy: derivation_strategy.to_string(), confirmed, unconfirmed, cursor })
    }
}

impl ChainClient for MockChainClient {
    async fn sync(
        &self,
        _crypto_code: &str,
        derivation_strategy: &str,
        previous: Option<&Changeset>,
        _long_poll: bool,
        cancel: &CancellationToken,
    ) -> Result<Changeset, ChainClientError> {
        if cancel.is_cancelled() {
            return Err(ChainClientError::Cancelled);
        }
        {
            let mut state = self.state();
            state.syncs_in_flight += 1;
            state.max_syncs_in_flight = state.max_syncs_in_flight.max(state.syncs_in_flight);
        }
        let result = match self.wait_until_released(cancel).await {
            Ok(()) => self.sync_now(derivation_strategy, previous),
            Err(e) => Err(e),
        };
        self.state().syncs_in_flight -= 1;
        result
    }

    async fn get_transactions(
        &self,
        _crypto_code: &str,
        txids: &[String],
    ) -> Result<HashMap<String, TransactionInfo>, ChainClientError> {
        let state = self.state();
        Ok(txids.iter().filter_map(|id| state.transactions.get(id).map(|tx| (id.clone(), tx.clone()))).collect())
    }

    async fn reserve_address(
        &self,
        _crypto_code: &str,
        derivation_strategy: &str,
    ) -> Result<ReservedAddress, ChainClientError> {
        let mut state = self.state();
        let queued = state.addresses.get_mut(derivation_strategy).and_then(|q| q.pop_front());
        let address = match queued {
            Some(a) => a,
            None => {
                state.address_counter += 1;
                format!("{derivation_strategy}-addr-{}", state.address_counter)
            },
        };
        Ok(ReservedAddress { address, key_path: None })
    }
}

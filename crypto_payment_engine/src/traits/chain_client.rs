use std::{collections::HashMap, future::Future};

use chrono::{DateTime, Utc};
use cpg_common::Amount;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::payment_methods::OutPoint;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainClientError {
    #[error("Temporary chain client failure: {0}")]
    Transient(String),
    #[error("The chain client call was cancelled")]
    Cancelled,
    #[error("The chain client does not support {0}")]
    Unsupported(String),
}

/// An unspent output paying to one of the wallet's addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub address: String,
    pub value: Amount,
    pub key_path: Option<String>,
    pub confirmations: i64,
    /// Whether the funding transaction signals replace-by-fee.
    pub rbf: bool,
    pub timestamp: DateTime<Utc>,
}

/// The state of a wallet as seen by the chain client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub derivation_strategy: String,
    pub confirmed: Vec<Utxo>,
    pub unconfirmed: Vec<Utxo>,
    /// Opaque marker the client can use to only report what changed since this changeset.
    pub cursor: Option<String>,
}

impl Changeset {
    pub fn utxos(&self) -> impl Iterator<Item = &Utxo> {
        self.confirmed.iter().chain(self.unconfirmed.iter())
    }
}

/// A transaction as currently seen by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub txid: String,
    /// Depth in the chain. Zero while in the mempool, negative if the node knows it was replaced or conflicted.
    pub confirmations: i64,
    /// The outputs the transaction spends. Two transactions sharing an input are double-spends of each other.
    pub inputs: Vec<OutPoint>,
    pub rbf: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedAddress {
    pub address: String,
    pub key_path: Option<String>,
}

/// Notifications from the chain-watching layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A block was mined. Every pending invoice is re-checked.
    NewBlock { crypto_code: String },
    /// An output paying to a watched address was seen.
    TxOutReceived { crypto_code: String, address: String },
}

/// Read access to a chain node or indexer, plus address reservation from the merchant's wallet.
pub trait ChainClient: Clone + Send + Sync + 'static {
    /// Fetches the UTXO set of the wallet behind `derivation_strategy`. `previous` is the last changeset returned for
    /// this wallet, if any. With `long_poll`, the call may wait for something to change. It must give up promptly
    /// when `cancel` fires.
    fn sync(
        &self,
        crypto_code: &str,
        derivation_strategy: &str,
        previous: Option<&Changeset>,
        long_poll: bool,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Changeset, ChainClientError>> + Send;

    /// Looks up transactions by id. Transactions the node does not know are absent from the result.
    fn get_transactions(
        &self,
        crypto_code: &str,
        txids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, TransactionInfo>, ChainClientError>> + Send;

    /// Derives and reserves an unused address of the wallet.
    fn reserve_address(
        &self,
        crypto_code: &str,
        derivation_strategy: &str,
    ) -> impl Future<Output = Result<ReservedAddress, ChainClientError>> + Send;
}

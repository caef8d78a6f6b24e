//! Payment rails.
//!
//! Each rail contributes a variant to [`PaymentMethodDetails`] and [`PaymentData`], plus a
//! [`PaymentMethodHandler`] that knows how to (de)serialize them and estimate the next network fee. The handlers are
//! collected in a [`PaymentMethodHandlers`] registry, which is the only place that needs to change when a new rail is
//! added. The invoice state machine never inspects rail-specific data directly.
mod bitcoin;
mod handlers;
mod lightning;
mod networks;

pub use bitcoin::{
    BitcoinLikeDetails,
    BitcoinLikePaymentData,
    NetworkFeeMode,
    OutPoint,
    TX_SIZE_ESTIMATE_VBYTES,
};
use cpg_common::Amount;
pub use handlers::{BitcoinLikeHandler, LightningLikeHandler, PaymentMethodHandler, PaymentMethodHandlers};
pub use lightning::{LightningLikeDetails, LightningLikePaymentData};
pub use networks::{Network, DEFAULT_MAX_TRACKED_CONFIRMATION};

use crate::db_types::{PaymentType, SpeedPolicy};

//--------------------------------------  PaymentMethodDetails  -----------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMethodDetails {
    BitcoinLike(BitcoinLikeDetails),
    LightningLike(LightningLikeDetails),
}

impl PaymentMethodDetails {
    pub fn payment_type(&self) -> PaymentType {
        match self {
            PaymentMethodDetails::BitcoinLike(_) => PaymentType::BtcLike,
            PaymentMethodDetails::LightningLike(_) => PaymentType::LightningLike,
        }
    }

    /// Where the customer should send funds: an address or a BOLT11 invoice.
    pub fn destination(&self) -> &str {
        match self {
            PaymentMethodDetails::BitcoinLike(d) => d.deposit_address.as_str(),
            PaymentMethodDetails::LightningLike(d) => d.bolt11.as_str(),
        }
    }

    pub fn as_bitcoin(&self) -> Option<&BitcoinLikeDetails> {
        match self {
            PaymentMethodDetails::BitcoinLike(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_bitcoin_mut(&mut self) -> Option<&mut BitcoinLikeDetails> {
        match self {
            PaymentMethodDetails::BitcoinLike(d) => Some(d),
            _ => None,
        }
    }
}

//--------------------------------------      PaymentData       -----------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentData {
    BitcoinLike(BitcoinLikePaymentData),
    LightningLike(LightningLikePaymentData),
}

impl PaymentData {
    pub fn payment_type(&self) -> PaymentType {
        match self {
            PaymentData::BitcoinLike(_) => PaymentType::BtcLike,
            PaymentData::LightningLike(_) => PaymentType::LightningLike,
        }
    }

    /// The rail-specific unique identifier of this payment. The UTXO outpoint for on-chain payments and the payment
    /// hash for Lightning.
    pub fn payment_id(&self) -> String {
        match self {
            PaymentData::BitcoinLike(d) => d.outpoint.to_string(),
            PaymentData::LightningLike(d) => d.payment_hash.clone(),
        }
    }

    pub fn value(&self) -> Amount {
        match self {
            PaymentData::BitcoinLike(d) => d.value,
            PaymentData::LightningLike(d) => d.amount,
        }
    }

    pub fn destination(&self) -> &str {
        match self {
            PaymentData::BitcoinLike(d) => d.address.as_str(),
            PaymentData::LightningLike(d) => d.bolt11.as_str(),
        }
    }

    /// Whether the funds can be counted as settled under the given speed policy.
    pub fn confirmed(&self, speed: SpeedPolicy) -> bool {
        match self {
            PaymentData::BitcoinLike(d) => d.confirmed(speed),
            PaymentData::LightningLike(_) => true,
        }
    }

    /// Whether the payment is deep enough in the chain to be considered final.
    pub fn completed(&self, network: &Network) -> bool {
        match self {
            PaymentData::BitcoinLike(d) => d.completed(network),
            PaymentData::LightningLike(_) => true,
        }
    }

    /// Terms an operator can use to find the owning invoice.
    pub fn search_terms(&self) -> Vec<String> {
        match self {
            PaymentData::BitcoinLike(d) => vec![d.outpoint.txid.clone(), d.address.clone()],
            PaymentData::LightningLike(d) => vec![d.payment_hash.clone(), d.bolt11.clone()],
        }
    }

    pub fn as_bitcoin(&self) -> Option<&BitcoinLikePaymentData> {
        match self {
            PaymentData::BitcoinLike(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_bitcoin_mut(&mut self) -> Option<&mut BitcoinLikePaymentData> {
        match self {
            PaymentData::BitcoinLike(d) => Some(d),
            _ => None,
        }
    }
}

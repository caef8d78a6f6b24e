//! On-chain (UTXO based) payment rail.
use std::fmt::Display;

use cpg_common::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{db_types::SpeedPolicy, payment_methods::Network};

/// Virtual size, in vbytes, assumed for the extra transaction a customer needs to send when paying in several parts.
pub const TX_SIZE_ESTIMATE_VBYTES: i64 = 100;

//--------------------------------------   NetworkFeeMode   ---------------------------------------------------------
/// Controls when the cost of an additional on-chain transaction is added to the amount due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkFeeMode {
    /// No fee for the first payment. Every payment after that carries a fee.
    #[default]
    MultiplePaymentsOnly,
    /// Every payment carries a fee, including the first.
    Always,
    /// Network fees are never charged to the customer.
    Never,
}

//--------------------------------------  BitcoinLikeDetails  -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinLikeDetails {
    /// The address the customer is currently asked to pay to.
    pub deposit_address: String,
    #[serde(default)]
    pub key_path: Option<String>,
    /// The wallet descriptor that deposit addresses are derived from.
    pub derivation_strategy: String,
    /// Fee rate in base units per vbyte.
    pub fee_rate: Decimal,
    #[serde(default)]
    pub network_fee_mode: NetworkFeeMode,
    /// The fee the next payment will be charged with, in whole coins.
    #[serde(default)]
    pub next_network_fee: Amount,
}

impl BitcoinLikeDetails {
    pub fn new<S: Into<String>>(deposit_address: S, derivation_strategy: S, fee_rate: Decimal) -> Self {
        Self {
            deposit_address: deposit_address.into(),
            key_path: None,
            derivation_strategy: derivation_strategy.into(),
            fee_rate,
            network_fee_mode: NetworkFeeMode::default(),
            next_network_fee: Amount::ZERO,
        }
    }

    pub fn with_network_fee_mode(mut self, mode: NetworkFeeMode) -> Self {
        self.network_fee_mode = mode;
        self
    }

    /// The cost of one more transaction at the current fee rate, in whole coins.
    pub fn tx_fee(&self, divisibility: u32) -> Amount {
        let base_units = self.fee_rate * Decimal::from(TX_SIZE_ESTIMATE_VBYTES);
        Amount::from_base_units(1, divisibility).checked_mul(base_units).unwrap_or_default().round_up(divisibility)
    }

    /// The network fee in force before any payment has been received.
    pub fn initial_network_fee(&self, divisibility: u32) -> Amount {
        match self.network_fee_mode {
            NetworkFeeMode::Always => self.tx_fee(divisibility),
            NetworkFeeMode::MultiplePaymentsOnly | NetworkFeeMode::Never => Amount::ZERO,
        }
    }
}

//--------------------------------------       OutPoint        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

impl OutPoint {
    pub fn new<S: Into<String>>(txid: S, vout: u32) -> Self {
        Self { txid: txid.into(), vout }
    }
}

impl Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.txid, self.vout)
    }
}

//--------------------------------------  BitcoinLikePaymentData  ---------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinLikePaymentData {
    pub outpoint: OutPoint,
    pub address: String,
    pub value: Amount,
    pub confirmation_count: i64,
    /// Whether the transaction signals replace-by-fee.
    pub rbf: bool,
    #[serde(default)]
    pub key_path: Option<String>,
}

impl BitcoinLikePaymentData {
    pub fn new<S: Into<String>>(outpoint: OutPoint, address: S, value: Amount) -> Self {
        Self { outpoint, address: address.into(), value, confirmation_count: 0, rbf: false, key_path: None }
    }

    pub fn with_confirmations(mut self, confirmations: i64) -> Self {
        self.confirmation_count = confirmations;
        self
    }

    pub fn with_rbf(mut self, rbf: bool) -> Self {
        self.rbf = rbf;
        self
    }

    pub fn confirmed(&self, speed: SpeedPolicy) -> bool {
        match speed {
            SpeedPolicy::HighSpeed => self.confirmation_count >= 1 || !self.rbf,
            SpeedPolicy::MediumSpeed => self.confirmation_count >= 1,
            SpeedPolicy::LowMediumSpeed => self.confirmation_count >= 2,
            SpeedPolicy::LowSpeed => self.confirmation_count >= 6,
        }
    }

    pub fn completed(&self, network: &Network) -> bool {
        self.confirmation_count >= network.max_tracked_confirmation
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    fn payment(confirmations: i64, rbf: bool) -> BitcoinLikePaymentData {
        BitcoinLikePaymentData::new(OutPoint::new("aa", 0), "bc1qtest", Amount::from(1))
            .with_confirmations(confirmations)
            .with_rbf(rbf)
    }

    #[test]
    fn speed_policies() {
        assert!(payment(0, false).confirmed(SpeedPolicy::HighSpeed));
        assert!(!payment(0, true).confirmed(SpeedPolicy::HighSpeed));
        assert!(payment(1, true).confirmed(SpeedPolicy::HighSpeed));
        assert!(!payment(0, false).confirmed(SpeedPolicy::MediumSpeed));
        assert!(payment(1, false).confirmed(SpeedPolicy::MediumSpeed));
        assert!(!payment(1, false).confirmed(SpeedPolicy::LowMediumSpeed));
        assert!(payment(2, false).confirmed(SpeedPolicy::LowMediumSpeed));
        assert!(!payment(5, false).confirmed(SpeedPolicy::LowSpeed));
        assert!(payment(6, false).confirmed(SpeedPolicy::LowSpeed));
        assert!(!payment(5, false).completed(&Network::bitcoin()));
        assert!(payment(6, false).completed(&Network::bitcoin()));
    }

    #[test]
    fn tx_fee_is_fee_rate_times_estimated_size() {
        let details = BitcoinLikeDetails::new("addr", "xpub", dec!(20));
        // 20 sat/vbyte * 100 vbytes = 2000 sats
        assert_eq!(details.tx_fee(8), Amount::new(dec!(0.00002)));
        assert_eq!(details.initial_network_fee(8), Amount::ZERO);
        let always = details.clone().with_network_fee_mode(NetworkFeeMode::Always);
        assert_eq!(always.initial_network_fee(8), Amount::new(dec!(0.00002)));
        let never = details.with_network_fee_mode(NetworkFeeMode::Never);
        assert_eq!(never.initial_network_fee(8), Amount::ZERO);
    }
}

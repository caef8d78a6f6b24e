//! Lightning payment rail. Lightning payments settle instantly, so they are confirmed as soon as they are seen.
use cpg_common::Amount;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightningLikeDetails {
    pub bolt11: String,
    pub payment_hash: String,
    #[serde(default)]
    pub node_info: Option<String>,
}

impl LightningLikeDetails {
    pub fn new<S: Into<String>>(bolt11: S, payment_hash: S) -> Self {
        Self { bolt11: bolt11.into(), payment_hash: payment_hash.into(), node_info: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightningLikePaymentData {
    pub payment_hash: String,
    pub bolt11: String,
    pub amount: Amount,
    #[serde(default)]
    pub preimage: Option<String>,
}

impl LightningLikePaymentData {
    pub fn new<S: Into<String>>(payment_hash: S, bolt11: S, amount: Amount) -> Self {
        Self { payment_hash: payment_hash.into(), bolt11: bolt11.into(), amount, preimage: None }
    }
}

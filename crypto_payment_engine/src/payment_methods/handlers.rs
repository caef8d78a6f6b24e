use std::{collections::HashMap, fmt::Debug, sync::Arc};

use cpg_common::{Amount, DEFAULT_DIVISIBILITY};
use serde_json::Value;

use crate::{
    db_types::{PaymentMethod, PaymentMethodId, PaymentType},
    payment_methods::{
        BitcoinLikeDetails,
        BitcoinLikePaymentData,
        LightningLikeDetails,
        LightningLikePaymentData,
        Network,
        NetworkFeeMode,
        PaymentData,
        PaymentMethodDetails,
    },
    serialization::SerializationError,
};

/// Rail-specific behaviour needed by the storage and accounting layers.
pub trait PaymentMethodHandler: Send + Sync {
    fn payment_type(&self) -> PaymentType;

    fn parse_details(&self, value: Value) -> Result<PaymentMethodDetails, SerializationError>;

    fn serialize_details(&self, details: &PaymentMethodDetails) -> Result<Value, SerializationError>;

    fn parse_payment_data(&self, value: Value) -> Result<PaymentData, SerializationError>;

    fn serialize_payment_data(&self, data: &PaymentData) -> Result<Value, SerializationError>;

    /// The network fee that will be added to the amount due if the customer needs to send another payment.
    fn next_network_fee(&self, details: &PaymentMethodDetails) -> Amount;
}

fn wrong_type(expected: PaymentType, found: PaymentType) -> SerializationError {
    SerializationError::WrongPaymentType { expected: expected.to_string(), found: found.to_string() }
}

//--------------------------------------  BitcoinLikeHandler  -------------------------------------------------------
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcoinLikeHandler;

impl PaymentMethodHandler for BitcoinLikeHandler {
    fn payment_type(&self) -> PaymentType {
        PaymentType::BtcLike
    }

    fn parse_details(&self, value: Value) -> Result<PaymentMethodDetails, SerializationError> {
        let details = serde_json::from_value::<BitcoinLikeDetails>(value)?;
        Ok(PaymentMethodDetails::BitcoinLike(details))
    }

    fn serialize_details(&self, details: &PaymentMethodDetails) -> Result<Value, SerializationError> {
        match details {
            PaymentMethodDetails::BitcoinLike(d) => Ok(serde_json::to_value(d)?),
            other => Err(wrong_type(self.payment_type(), other.payment_type())),
        }
    }

    fn parse_payment_data(&self, value: Value) -> Result<PaymentData, SerializationError> {
        let data = serde_json::from_value::<BitcoinLikePaymentData>(value)?;
        Ok(PaymentData::BitcoinLike(data))
    }

    fn serialize_payment_data(&self, data: &PaymentData) -> Result<Value, SerializationError> {
        match data {
            PaymentData::BitcoinLike(d) => Ok(serde_json::to_value(d)?),
            other => Err(wrong_type(self.payment_type(), other.payment_type())),
        }
    }

    fn next_network_fee(&self, details: &PaymentMethodDetails) -> Amount {
        match details {
            PaymentMethodDetails::BitcoinLike(d) => match d.network_fee_mode {
                NetworkFeeMode::Never => Amount::ZERO,
                NetworkFeeMode::Always | NetworkFeeMode::MultiplePaymentsOnly => d.next_network_fee,
            },
            _ => Amount::ZERO,
        }
    }
}

//--------------------------------------  LightningLikeHandler  -----------------------------------------------------
#[derive(Debug, Clone, Copy, Default)]
pub struct LightningLikeHandler;

impl PaymentMethodHandler for LightningLikeHandler {
    fn payment_type(&self) -> PaymentType {
        PaymentType::LightningLike
    }

    fn parse_details(&self, value: Value) -> Result<PaymentMethodDetails, SerializationError> {
        let details = serde_json::from_value::<LightningLikeDetails>(value)?;
        Ok(PaymentMethodDetails::LightningLike(details))
    }

    fn serialize_details(&self, details: &PaymentMethodDetails) -> Result<Value, SerializationError> {
        match details {
            PaymentMethodDetails::LightningLike(d) => Ok(serde_json::to_value(d)?),
            other => Err(wrong_type(self.payment_type(), other.payment_type())),
        }
    }

    fn parse_payment_data(&self, value: Value) -> Result<PaymentData, SerializationError> {
        let data = serde_json::from_value::<LightningLikePaymentData>(value)?;
        Ok(PaymentData::LightningLike(data))
    }

    fn serialize_payment_data(&self, data: &PaymentData) -> Result<Value, SerializationError> {
        match data {
            PaymentData::LightningLike(d) => Ok(serde_json::to_value(d)?),
            other => Err(wrong_type(self.payment_type(), other.payment_type())),
        }
    }

    fn next_network_fee(&self, _details: &PaymentMethodDetails) -> Amount {
        Amount::ZERO
    }
}

//-------------------------------------- PaymentMethodHandlers  -----------------------------------------------------
/// Registry of the payment rails and crypto networks this deployment supports.
///
/// The default registry knows about on-chain and Lightning payments on the Bitcoin network.
#[derive(Clone)]
pub struct PaymentMethodHandlers {
    handlers: HashMap<PaymentType, Arc<dyn PaymentMethodHandler>>,
    networks: HashMap<String, Network>,
}

impl Debug for PaymentMethodHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut rails = self.handlers.keys().map(|t| t.to_string()).collect::<Vec<_>>();
        rails.sort();
        let mut networks = self.networks.keys().cloned().collect::<Vec<_>>();
        networks.sort();
        write!(f, "PaymentMethodHandlers (rails: {rails:?}, networks: {networks:?})")
    }
}

impl Default for PaymentMethodHandlers {
    fn default() -> Self {
        Self::empty().with_handler(BitcoinLikeHandler).with_handler(LightningLikeHandler).with_network(Network::bitcoin())
    }
}

impl PaymentMethodHandlers {
    pub fn empty() -> Self {
        Self { handlers: HashMap::new(), networks: HashMap::new() }
    }

    pub fn with_handler<H: PaymentMethodHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.payment_type(), Arc::new(handler));
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.networks.insert(network.crypto_code.clone(), network);
        self
    }

    pub fn handler(&self, payment_type: PaymentType) -> Option<&Arc<dyn PaymentMethodHandler>> {
        self.handlers.get(&payment_type)
    }

    pub fn network(&self, crypto_code: &str) -> Option<&Network> {
        self.networks.get(&crypto_code.to_ascii_uppercase())
    }

    /// The divisibility of the asset, falling back to the default of 8 decimal places for unknown networks.
    pub fn divisibility(&self, crypto_code: &str) -> u32 {
        self.network(crypto_code).map(|n| n.divisibility).unwrap_or(DEFAULT_DIVISIBILITY)
    }

    /// True if both the rail and the network of the payment method are known.
    pub fn supports(&self, id: &PaymentMethodId) -> bool {
        self.handlers.contains_key(&id.payment_type) && self.network(&id.crypto_code).is_some()
    }

    pub fn next_network_fee(&self, method: &PaymentMethod) -> Amount {
        self.handler(method.id.payment_type).map(|h| h.next_network_fee(&method.details)).unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn default_registry() {
        let handlers = PaymentMethodHandlers::default();
        assert!(handlers.supports(&"BTC-CHAIN".parse().unwrap()));
        assert!(handlers.supports(&"btc-ln".parse().unwrap()));
        assert!(!handlers.supports(&"LTC-CHAIN".parse().unwrap()));
        assert_eq!(handlers.divisibility("BTC"), 8);
        assert_eq!(handlers.divisibility("DOGE"), 8);
        let handlers = handlers.with_network(Network::new("XMR", "Monero").with_divisibility(12));
        assert_eq!(handlers.divisibility("xmr"), 12);
    }

    #[test]
    fn handlers_reject_other_rails() {
        let ln = PaymentMethodDetails::LightningLike(LightningLikeDetails::new("lnbc1", "hash"));
        assert!(matches!(
            BitcoinLikeHandler.serialize_details(&ln),
            Err(SerializationError::WrongPaymentType { .. })
        ));
    }

    #[test]
    fn parse_bitcoin_details() {
        let value = json!({
            "depositAddress": "bc1qaddr",
            "derivationStrategy": "xpub-main",
            "feeRate": "10",
            "networkFeeMode": "Always",
            "nextNetworkFee": "0.00001"
        });
        let details = BitcoinLikeHandler.parse_details(value).unwrap();
        assert_eq!(details.destination(), "bc1qaddr");
        assert_eq!(BitcoinLikeHandler.next_network_fee(&details), Amount::new(dec!(0.00001)));
        let round_trip = BitcoinLikeHandler.serialize_details(&details).unwrap();
        assert_eq!(BitcoinLikeHandler.parse_details(round_trip).unwrap(), details);
    }
}

//! JSON blob (de)serialization of the rail-specific parts of invoices and payments.
//!
//! There is no global serializer. A [`BlobSerializer`] is constructed with the handler registry it should use and
//! handed to whatever needs to read or write blobs (usually the repository).
use chrono::{DateTime, Utc};
use cpg_common::Amount;
use log::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    db_types::{InvoiceId, Payment, PaymentMethod, PaymentMethodId},
    payment_methods::{PaymentData, PaymentMethodHandlers},
};

#[derive(Debug, Clone, Error)]
pub enum SerializationError {
    #[error("Invalid JSON blob: {0}")]
    InvalidJson(String),
    #[error("Payment method {0} is not supported")]
    UnsupportedPaymentMethod(String),
    #[error("Expected {expected} data, but found {found}")]
    WrongPaymentType { expected: String, found: String },
}

impl From<serde_json::Error> for SerializationError {
    fn from(e: serde_json::Error) -> Self {
        SerializationError::InvalidJson(e.to_string())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentMethodEntry {
    payment_method_id: PaymentMethodId,
    rate: Decimal,
    details: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentEntry {
    payment_method_id: PaymentMethodId,
    received_time: DateTime<Utc>,
    #[serde(default)]
    network_fee: Amount,
    data: Value,
}

#[derive(Debug, Clone, Default)]
pub struct BlobSerializer {
    handlers: PaymentMethodHandlers,
}

impl BlobSerializer {
    pub fn new(handlers: PaymentMethodHandlers) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &PaymentMethodHandlers {
        &self.handlers
    }

    pub fn serialize_payment_methods(&self, methods: &[PaymentMethod]) -> Result<String, SerializationError> {
        let entries = methods
            .iter()
            .map(|m| {
                let handler = self
                    .handlers
                    .handler(m.id.payment_type)
                    .ok_or_else(|| SerializationError::UnsupportedPaymentMethod(m.id.to_string()))?;
                let details = handler.serialize_details(&m.details)?;
                Ok(PaymentMethodEntry { payment_method_id: m.id.clone(), rate: m.rate, details })
            })
            .collect::<Result<Vec<_>, SerializationError>>()?;
        Ok(serde_json::to_string(&entries)?)
    }

    /// Entries for rails without a registered handler are skipped, so that an invoice stays readable after a rail is
    /// retired.
    pub fn deserialize_payment_methods(&self, blob: &str) -> Result<Vec<PaymentMethod>, SerializationError> {
        let entries = serde_json::from_str::<Vec<PaymentMethodEntry>>(blob)?;
        let mut methods = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(handler) = self.handlers.handler(entry.payment_method_id.payment_type) else {
                warn!("🗃️ Skipping payment method {} since no handler is registered for it", entry.payment_method_id);
                continue;
            };
            let details = handler.parse_details(entry.details)?;
            methods.push(PaymentMethod::new(entry.payment_method_id, entry.rate, details));
        }
        Ok(methods)
    }

    pub fn serialize_payment(&self, payment: &Payment) -> Result<String, SerializationError> {
        let handler = self
            .handlers
            .handler(payment.payment_method_id.payment_type)
            .ok_or_else(|| SerializationError::UnsupportedPaymentMethod(payment.payment_method_id.to_string()))?;
        let entry = PaymentEntry {
            payment_method_id: payment.payment_method_id.clone(),
            received_time: payment.received_time,
            network_fee: payment.network_fee,
            data: handler.serialize_payment_data(&payment.data)?,
        };
        Ok(serde_json::to_string(&entry)?)
    }

    pub fn deserialize_payment(
        &self,
        invoice_id: InvoiceId,
        accounted: bool,
        blob: &str,
    ) -> Result<Payment, SerializationError> {
        let entry = serde_json::from_str::<PaymentEntry>(blob)?;
        let handler = self
            .handlers
            .handler(entry.payment_method_id.payment_type)
            .ok_or_else(|| SerializationError::UnsupportedPaymentMethod(entry.payment_method_id.to_string()))?;
        let data: PaymentData = handler.parse_payment_data(entry.data)?;
        let payment = Payment::new(invoice_id, entry.payment_method_id, entry.received_time, data)
            .with_network_fee(entry.network_fee)
            .with_accounted(accounted);
        Ok(payment)
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::payment_methods::{
        BitcoinLikeDetails,
        BitcoinLikePaymentData,
        LightningLikeDetails,
        OutPoint,
        PaymentMethodDetails,
    };

    #[test]
    fn payment_method_blob() {
        let serializer = BlobSerializer::default();
        let methods = vec![
            PaymentMethod::new(
                PaymentMethodId::on_chain("BTC"),
                dec!(50000),
                PaymentMethodDetails::BitcoinLike(BitcoinLikeDetails::new("bc1qaddr", "xpub", dec!(1))),
            ),
            PaymentMethod::new(
                PaymentMethodId::lightning("BTC"),
                dec!(50000),
                PaymentMethodDetails::LightningLike(LightningLikeDetails::new("lnbc1", "hash")),
            ),
        ];
        let blob = serializer.serialize_payment_methods(&methods).unwrap();
        assert!(blob.contains("\"paymentMethodId\":\"BTC-CHAIN\""));
        assert_eq!(serializer.deserialize_payment_methods(&blob).unwrap(), methods);
    }

    #[test]
    fn unknown_rails_are_skipped_when_reading() {
        let on_chain_only = BlobSerializer::new(PaymentMethodHandlers::empty().with_handler(
            crate::payment_methods::BitcoinLikeHandler,
        ));
        let blob = r#"[
            {"paymentMethodId":"BTC-LN","rate":"1","details":{"bolt11":"lnbc1","paymentHash":"h"}},
            {"paymentMethodId":"BTC-CHAIN","rate":"1","details":{"depositAddress":"a","derivationStrategy":"x","feeRate":"0"}}
        ]"#;
        let methods = on_chain_only.deserialize_payment_methods(blob).unwrap();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].id, PaymentMethodId::on_chain("BTC"));
    }

    #[test]
    fn payment_blob() {
        let serializer = BlobSerializer::default();
        let data = PaymentData::BitcoinLike(
            BitcoinLikePaymentData::new(OutPoint::new("txid1", 1), "bc1qaddr", Amount::new(dec!(0.5)))
                .with_confirmations(3),
        );
        let payment = Payment::new("inv1".into(), PaymentMethodId::on_chain("BTC"), Utc::now(), data)
            .with_network_fee(Amount::new(dec!(0.0001)))
            .with_accounted(false);
        assert_eq!(payment.id, "txid1-1");
        let blob = serializer.serialize_payment(&payment).unwrap();
        let decoded = serializer.deserialize_payment("inv1".into(), false, &blob).unwrap();
        assert_eq!(decoded, payment);
        assert!(serializer.deserialize_payment("inv1".into(), true, "not json").is_err());
    }
}

//! The invoice data model shared by the accounting, reconciliation and storage layers.
use std::{collections::HashSet, fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use cpg_common::Amount;
use once_cell::sync::Lazy;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

pub use crate::invoice_state::{InvoiceExceptionStatus, InvoiceState, InvoiceStatus};
use crate::payment_methods::{PaymentData, PaymentMethodDetails};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Conversion error: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------       InvoiceId       ---------------------------------------------------------
/// Length of generated invoice ids. 22 alphanumeric characters carry roughly 130 bits of entropy.
pub const INVOICE_ID_LENGTH: usize = 22;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct InvoiceId(pub String);

impl InvoiceId {
    /// A fresh, non-sequential invoice id.
    pub fn random() -> Self {
        let id = rand::thread_rng().sample_iter(&Alphanumeric).take(INVOICE_ID_LENGTH).map(char::from).collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for InvoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InvoiceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InvoiceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

//--------------------------------------      SpeedPolicy      ---------------------------------------------------------
/// How many confirmations a payment needs before its funds count as settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedPolicy {
    /// Zero confirmations, as long as the transaction does not signal replace-by-fee.
    HighSpeed,
    /// One confirmation.
    #[default]
    MediumSpeed,
    /// Two confirmations.
    LowMediumSpeed,
    /// Six confirmations.
    LowSpeed,
}

impl Display for SpeedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeedPolicy::HighSpeed => write!(f, "HighSpeed"),
            SpeedPolicy::MediumSpeed => write!(f, "MediumSpeed"),
            SpeedPolicy::LowMediumSpeed => write!(f, "LowMediumSpeed"),
            SpeedPolicy::LowSpeed => write!(f, "LowSpeed"),
        }
    }
}

impl FromStr for SpeedPolicy {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "highspeed" | "high" => Ok(Self::HighSpeed),
            "mediumspeed" | "medium" => Ok(Self::MediumSpeed),
            "lowmediumspeed" | "lowmedium" => Ok(Self::LowMediumSpeed),
            "lowspeed" | "low" => Ok(Self::LowSpeed),
            _ => Err(ConversionError(format!("Invalid speed policy: {s}"))),
        }
    }
}

//--------------------------------------      PaymentType      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PaymentType {
    /// On-chain payments to a UTXO address.
    BtcLike,
    /// Off-chain payments over the Lightning network.
    LightningLike,
}

impl PaymentType {
    pub fn suffix(&self) -> &'static str {
        match self {
            PaymentType::BtcLike => "CHAIN",
            PaymentType::LightningLike => "LN",
        }
    }
}

impl Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentType::BtcLike => write!(f, "BTCLike"),
            PaymentType::LightningLike => write!(f, "LightningLike"),
        }
    }
}

impl FromStr for PaymentType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chain" | "onchain" | "btclike" => Ok(Self::BtcLike),
            "ln" | "lightning" | "lightninglike" | "lightningnetwork" => Ok(Self::LightningLike),
            _ => Err(ConversionError(format!("Invalid payment type: {s}"))),
        }
    }
}

//--------------------------------------    PaymentMethodId    ---------------------------------------------------------
static PAYMENT_METHOD_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<code>[A-Za-z0-9]+)(?:[-_](?P<rail>[A-Za-z]+))?$").expect("Invalid regex"));

/// Identifies one payment rail of one network, e.g. `BTC-CHAIN` or `BTC-LN`.
///
/// A bare crypto code (`BTC`) is read as the on-chain rail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentMethodId {
    pub crypto_code: String,
    pub payment_type: PaymentType,
}

impl PaymentMethodId {
    pub fn new<S: AsRef<str>>(crypto_code: S, payment_type: PaymentType) -> Self {
        Self { crypto_code: crypto_code.as_ref().to_ascii_uppercase(), payment_type }
    }

    pub fn on_chain<S: AsRef<str>>(crypto_code: S) -> Self {
        Self::new(crypto_code, PaymentType::BtcLike)
    }

    pub fn lightning<S: AsRef<str>>(crypto_code: S) -> Self {
        Self::new(crypto_code, PaymentType::LightningLike)
    }
}

impl Display for PaymentMethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.crypto_code, self.payment_type.suffix())
    }
}

impl FromStr for PaymentMethodId {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = PAYMENT_METHOD_ID_RE
            .captures(s.trim())
            .ok_or_else(|| ConversionError(format!("Invalid payment method id: {s}")))?;
        let payment_type = match caps.name("rail") {
            Some(rail) => rail.as_str().parse()?,
            None => PaymentType::BtcLike,
        };
        Ok(Self::new(&caps["code"], payment_type))
    }
}

impl TryFrom<String> for PaymentMethodId {
    type Error = ConversionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PaymentMethodId> for String {
    fn from(value: PaymentMethodId) -> Self {
        value.to_string()
    }
}

//--------------------------------------     PaymentMethod     ---------------------------------------------------------
/// One payment rail as offered on one invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    /// Price of one coin in the invoice currency, locked in when the invoice was created.
    pub rate: Decimal,
    pub details: PaymentMethodDetails,
}

impl PaymentMethod {
    pub fn new(id: PaymentMethodId, rate: Decimal, details: PaymentMethodDetails) -> Self {
        Self { id, rate, details }
    }
}

//--------------------------------------        Payment        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    /// Rail-specific unique id. See [`PaymentData::payment_id`].
    pub id: String,
    pub invoice_id: InvoiceId,
    pub payment_method_id: PaymentMethodId,
    pub received_time: DateTime<Utc>,
    /// The network fee charged against this payment, fixed when it was received.
    pub network_fee: Amount,
    /// Whether the payment currently counts towards the invoice's paid total.
    pub accounted: bool,
    pub data: PaymentData,
}

impl Payment {
    pub fn new(
        invoice_id: InvoiceId,
        payment_method_id: PaymentMethodId,
        received_time: DateTime<Utc>,
        data: PaymentData,
    ) -> Self {
        Self {
            id: data.payment_id(),
            invoice_id,
            payment_method_id,
            received_time,
            network_fee: Amount::ZERO,
            accounted: true,
            data,
        }
    }

    pub fn with_network_fee(mut self, fee: Amount) -> Self {
        self.network_fee = fee;
        self
    }

    pub fn with_accounted(mut self, accounted: bool) -> Self {
        self.accounted = accounted;
        self
    }

    /// Accounted and confirmed under the given speed policy.
    pub fn is_settled(&self, speed: SpeedPolicy) -> bool {
        self.accounted && self.data.confirmed(speed)
    }
}

//--------------------------------------    InvoiceAddress     ---------------------------------------------------------
/// A deposit address that has been handed out for an invoice.
///
/// Addresses are never forgotten. Once an invoice stops expecting funds, the address is merely unassigned so that
/// it no longer routes notifications to the invoice, while periodic sweeps still pick up late payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceAddress {
    pub invoice_id: InvoiceId,
    pub payment_method_id: PaymentMethodId,
    pub address: String,
    pub assigned_at: DateTime<Utc>,
    pub unassigned_at: Option<DateTime<Utc>>,
}

impl InvoiceAddress {
    pub fn is_active(&self) -> bool {
        self.unassigned_at.is_none()
    }
}

//--------------------------------------      LogSeverity      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
    Success,
}

impl Display for LogSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSeverity::Info => write!(f, "Info"),
            LogSeverity::Warning => write!(f, "Warning"),
            LogSeverity::Error => write!(f, "Error"),
            LogSeverity::Success => write!(f, "Success"),
        }
    }
}

impl FromStr for LogSeverity {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Info" => Ok(Self::Info),
            "Warning" => Ok(Self::Warning),
            "Error" => Ok(Self::Error),
            "Success" => Ok(Self::Success),
            s => Err(ConversionError(format!("Invalid log severity: {s}"))),
        }
    }
}

//--------------------------------------      InvoiceLog       ---------------------------------------------------------
/// One line of an invoice's audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceLog {
    pub timestamp: DateTime<Utc>,
    pub severity: LogSeverity,
    pub message: String,
}

impl InvoiceLog {
    pub fn new<S: Into<String>>(severity: LogSeverity, message: S) -> Self {
        Self { timestamp: Utc::now(), severity, message: message.into() }
    }

    pub fn info<S: Into<String>>(message: S) -> Self {
        Self::new(LogSeverity::Info, message)
    }

    pub fn warning<S: Into<String>>(message: S) -> Self {
        Self::new(LogSeverity::Warning, message)
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::new(LogSeverity::Error, message)
    }

    pub fn success<S: Into<String>>(message: S) -> Self {
        Self::new(LogSeverity::Success, message)
    }
}

//--------------------------------------        Invoice        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub id: InvoiceId,
    pub store_id: String,
    pub order_id: Option<String>,
    pub price: Decimal,
    pub currency: String,
    pub invoice_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    /// After this time, an invoice that is still unpaid or unconfirmed is abandoned.
    pub monitoring_expiration: DateTime<Utc>,
    pub speed_policy: SpeedPolicy,
    pub status: InvoiceStatus,
    pub exception_status: InvoiceExceptionStatus,
    pub archived: bool,
    /// Percentage of underpayment that is still accepted as payment in full.
    pub payment_tolerance: Decimal,
    pub payment_methods: Vec<PaymentMethod>,
    /// All recorded payments, in the order they were received.
    pub payments: Vec<Payment>,
    /// Every address ever assigned to the invoice. Only populated when explicitly requested.
    pub addresses: Vec<InvoiceAddress>,
}

impl Invoice {
    pub fn state(&self) -> InvoiceState {
        InvoiceState::new(self.status, self.exception_status)
    }

    pub fn set_state(&mut self, state: InvoiceState) {
        self.status = state.status;
        self.exception_status = state.exception_status;
    }

    pub fn payment_method(&self, id: &PaymentMethodId) -> Option<&PaymentMethod> {
        self.payment_methods.iter().find(|m| &m.id == id)
    }

    pub fn payment_method_mut(&mut self, id: &PaymentMethodId) -> Option<&mut PaymentMethod> {
        self.payment_methods.iter_mut().find(|m| &m.id == id)
    }

    pub fn accounted_payments(&self) -> impl Iterator<Item = &Payment> {
        self.payments.iter().filter(|p| p.accounted)
    }

    pub fn has_accounted_payments(&self) -> bool {
        self.payments.iter().any(|p| p.accounted)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time <= now
    }

    pub fn is_monitoring_expired(&self, now: DateTime<Utc>) -> bool {
        self.monitoring_expiration < now
    }

    /// All addresses, current and historical, that belong to the invoice on the given network.
    pub fn known_addresses(&self, crypto_code: &str) -> HashSet<&str> {
        let from_history = self
            .addresses
            .iter()
            .filter(|a| a.payment_method_id.crypto_code.eq_ignore_ascii_case(crypto_code))
            .map(|a| a.address.as_str());
        let current = self
            .payment_methods
            .iter()
            .filter(|m| m.id.crypto_code.eq_ignore_ascii_case(crypto_code))
            .filter_map(|m| m.details.as_bitcoin().map(|d| d.deposit_address.as_str()));
        from_history.chain(current).collect()
    }

    /// Text-search terms that identify this invoice.
    pub fn search_terms(&self) -> Vec<String> {
        let mut terms = vec![self.id.to_string(), self.store_id.clone()];
        if let Some(order_id) = &self.order_id {
            terms.push(order_id.clone());
        }
        terms.extend(self.payment_methods.iter().map(|m| m.details.destination().to_string()));
        terms
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invoice_ids_are_random() {
        let a = InvoiceId::random();
        let b = InvoiceId::random();
        assert_eq!(a.as_str().len(), INVOICE_ID_LENGTH);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn payment_method_ids() {
        let id: PaymentMethodId = "btc-chain".parse().unwrap();
        assert_eq!(id, PaymentMethodId::on_chain("BTC"));
        assert_eq!(id.to_string(), "BTC-CHAIN");
        assert_eq!("BTC".parse::<PaymentMethodId>().unwrap(), id);
        assert_eq!("BTC_LightningLike".parse::<PaymentMethodId>().unwrap(), PaymentMethodId::lightning("btc"));
        assert_eq!("LTC-LN".parse::<PaymentMethodId>().unwrap().to_string(), "LTC-LN");
        assert!("BTC-WIRE".parse::<PaymentMethodId>().is_err());
        assert!("".parse::<PaymentMethodId>().is_err());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"BTC-CHAIN\"");
    }

    #[test]
    fn speed_policies_parse() {
        assert_eq!("HighSpeed".parse::<SpeedPolicy>().unwrap(), SpeedPolicy::HighSpeed);
        assert_eq!("lowmediumspeed".parse::<SpeedPolicy>().unwrap(), SpeedPolicy::LowMediumSpeed);
        assert_eq!(SpeedPolicy::LowSpeed.to_string().parse::<SpeedPolicy>().unwrap(), SpeedPolicy::LowSpeed);
        assert!("ludicrous".parse::<SpeedPolicy>().is_err());
    }
}

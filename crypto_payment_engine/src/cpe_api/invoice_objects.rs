use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    accounting::PaymentMethodAccounting,
    db_types::{InvoiceId, InvoiceState, PaymentMethodId, SpeedPolicy},
    payment_methods::PaymentMethodDetails,
};

pub const DEFAULT_EXPIRATION_MINUTES: i64 = 15;
pub const DEFAULT_MONITORING_MINUTES: i64 = 60 * 24;

/// A payment rail offered on a new invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentMethod {
    pub id: PaymentMethodId,
    pub details: PaymentMethodDetails,
    /// Locks in this rate instead of looking up the current bid rate.
    pub rate: Option<Decimal>,
}

impl NewPaymentMethod {
    pub fn new(id: PaymentMethodId, details: PaymentMethodDetails) -> Self {
        Self { id, details, rate: None }
    }

    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.rate = Some(rate);
        self
    }
}

/// A request to open a new invoice.
///
/// The invoice expires `expiration` after `invoice_time`, and is monitored for late confirmations for a further
/// `monitoring` after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoice {
    pub store_id: String,
    pub order_id: Option<String>,
    pub price: Decimal,
    pub currency: String,
    pub invoice_time: Option<DateTime<Utc>>,
    pub expiration: Duration,
    pub monitoring: Duration,
    pub speed_policy: SpeedPolicy,
    /// Accepted underpayment, in percent.
    pub payment_tolerance: Decimal,
    pub methods: Vec<NewPaymentMethod>,
}

impl NewInvoice {
    pub fn new<S: Into<String>>(store_id: S, price: Decimal, currency: S) -> Self {
        Self {
            store_id: store_id.into(),
            order_id: None,
            price,
            currency: currency.into(),
            invoice_time: None,
            expiration: Duration::minutes(DEFAULT_EXPIRATION_MINUTES),
            monitoring: Duration::minutes(DEFAULT_MONITORING_MINUTES),
            speed_policy: SpeedPolicy::default(),
            payment_tolerance: Decimal::ZERO,
            methods: vec![],
        }
    }

    pub fn with_order_id<S: Into<String>>(mut self, order_id: S) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_invoice_time(mut self, time: DateTime<Utc>) -> Self {
        self.invoice_time = Some(time);
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_monitoring(mut self, monitoring: Duration) -> Self {
        self.monitoring = monitoring;
        self
    }

    pub fn with_speed_policy(mut self, speed_policy: SpeedPolicy) -> Self {
        self.speed_policy = speed_policy;
        self
    }

    pub fn with_payment_tolerance(mut self, tolerance: Decimal) -> Self {
        self.payment_tolerance = tolerance;
        self
    }

    pub fn with_method(mut self, method: NewPaymentMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Checks the request for values that would make the invoice meaningless.
    pub fn validate(&self) -> Result<(), String> {
        if self.price.is_sign_negative() {
            return Err(format!("Price cannot be negative: {}", self.price));
        }
        if self.payment_tolerance < Decimal::ZERO || self.payment_tolerance > Decimal::ONE_HUNDRED {
            return Err(format!("Payment tolerance must be between 0 and 100, got {}", self.payment_tolerance));
        }
        if self.methods.is_empty() {
            return Err("At least one payment method is required".into());
        }
        if self.expiration <= Duration::zero() || self.monitoring < Duration::zero() {
            return Err("The expiration and monitoring windows must be positive".into());
        }
        if let Some(m) = self.methods.iter().find(|m| m.details.payment_type() != m.id.payment_type) {
            return Err(format!("Payment method {} was given {} details", m.id, m.details.payment_type()));
        }
        Ok(())
    }
}

/// What a checkout page needs to know about an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceAccounting {
    pub invoice_id: InvoiceId,
    pub state: InvoiceState,
    pub methods: Vec<MethodAccounting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodAccounting {
    pub payment_method_id: PaymentMethodId,
    pub destination: String,
    pub rate: Decimal,
    pub total_due: Decimal,
    pub paid: Decimal,
    pub due: Decimal,
    pub overpaid: Decimal,
    pub network_fee: Decimal,
    pub minimum_total_due: Decimal,
    pub tx_count: usize,
}

impl MethodAccounting {
    pub fn new(accounting: &PaymentMethodAccounting, destination: String, rate: Decimal) -> Self {
        Self {
            payment_method_id: accounting.payment_method_id.clone(),
            destination,
            rate,
            total_due: accounting.total_due.value(),
            paid: accounting.paid.value(),
            due: accounting.due.value(),
            overpaid: accounting.overpaid_helper.value(),
            network_fee: accounting.network_fee.value(),
            minimum_total_due: accounting.minimum_total_due.value(),
            tx_count: accounting.tx_count,
        }
    }
}

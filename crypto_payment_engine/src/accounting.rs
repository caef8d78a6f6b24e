//! How much is owed on an invoice, per payment method.
//!
//! Everything here is a pure function of the invoice (its price, locked-in rates and recorded payments) and the
//! network parameters in the handler registry.
use cpg_common::Amount;
use log::*;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    db_types::{Invoice, Payment, PaymentMethod, PaymentMethodId},
    payment_methods::PaymentMethodHandlers,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccountingError {
    #[error("The invoice does not offer payment method {0}")]
    UnknownPaymentMethod(PaymentMethodId),
    #[error("Payment method {0} has a zero exchange rate")]
    ZeroRate(PaymentMethodId),
    #[error("Arithmetic overflow while accounting for payment method {0}")]
    Overflow(PaymentMethodId),
}

/// The state of an invoice's balance, expressed in the currency of a single payment method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMethodAccounting {
    pub payment_method_id: PaymentMethodId,
    /// Everything the customer has to send, network fees included.
    pub total_due: Amount,
    /// Everything received so far, across all payment methods, converted into this method's currency.
    pub paid: Amount,
    /// What was received through this payment method only, in its own currency.
    pub crypto_paid: Amount,
    /// `total_due - paid`, floored at zero.
    pub due: Amount,
    /// `total_due - paid`. Negative when the invoice was overpaid.
    pub due_uncapped: Amount,
    pub overpaid_helper: Amount,
    /// The portion of `total_due` that is network fees.
    pub network_fee: Amount,
    /// The lowest paid total accepted as payment in full, after applying the invoice's payment tolerance.
    pub minimum_total_due: Amount,
    /// Number of payments received through this payment method.
    pub tx_count: usize,
    /// Number of transactions needed to settle the invoice, including one more if it is not yet paid enough.
    pub tx_required: usize,
}

impl PaymentMethodAccounting {
    /// True when the paid total lies inside the tolerance band.
    pub fn is_paid_enough(&self) -> bool {
        self.paid >= self.minimum_total_due
    }

    pub fn is_overpaid(&self) -> bool {
        self.paid > self.total_due
    }
}

/// Accounting for one payment method of the invoice.
///
/// Only accounted payments are considered. `filter` narrows them down further, e.g. to confirmed payments only.
pub fn calculate(
    invoice: &Invoice,
    payment_method_id: &PaymentMethodId,
    handlers: &PaymentMethodHandlers,
    filter: Option<&dyn Fn(&Payment) -> bool>,
) -> Result<PaymentMethodAccounting, AccountingError> {
    let method = invoice
        .payment_method(payment_method_id)
        .ok_or_else(|| AccountingError::UnknownPaymentMethod(payment_method_id.clone()))?;
    if method.rate.is_zero() {
        return Err(AccountingError::ZeroRate(method.id.clone()));
    }
    let precision = handlers.divisibility(&method.id.crypto_code);
    let overflow = || AccountingError::Overflow(method.id.clone());
    let mut total_due = Amount::new(invoice.price.checked_div(method.rate).ok_or_else(overflow)?).round_up(precision);
    let total_due_no_fee = total_due;

    let mut payments = invoice.accounted_payments().filter(|p| filter.map(|f| f(p)).unwrap_or(true)).collect::<Vec<_>>();
    payments.sort_by(|a, b| a.received_time.cmp(&b.received_time).then_with(|| a.id.cmp(&b.id)));

    let mut paid = Amount::ZERO;
    let mut crypto_paid = Amount::ZERO;
    let mut tx_count = 0usize;
    let mut paid_enough = paid >= total_due;
    for payment in payments {
        let Some(source) = invoice.payment_method(&payment.payment_method_id) else {
            trace!(
                "🧾️ Payment {} on invoice {} uses payment method {} which the invoice does not offer. Ignoring it.",
                payment.id,
                invoice.id,
                payment.payment_method_id
            );
            continue;
        };
        let fee = value_in(payment.network_fee, source, method, handlers).ok_or_else(overflow)?;
        paid += value_in(payment.data.value(), source, method, handlers).ok_or_else(overflow)?;
        if !paid_enough {
            total_due += fee;
        }
        paid_enough |= paid.round_up(precision) >= total_due.round_up(precision);
        if payment.payment_method_id == method.id {
            crypto_paid += payment.data.value();
            tx_count += 1;
        }
    }

    let mut tx_required = tx_count;
    if !paid_enough {
        tx_required += 1;
        total_due += handlers.next_network_fee(method);
    }

    let total_due = total_due.round_up(precision);
    let paid = paid.round_up(precision);
    let due_uncapped = total_due - paid;
    let tolerance = Decimal::ONE - invoice.payment_tolerance / Decimal::ONE_HUNDRED;
    let minimum_total_due =
        total_due.checked_mul(tolerance).ok_or_else(overflow)?.round_up(precision).max(Amount::one_unit(precision));
    Ok(PaymentMethodAccounting {
        payment_method_id: method.id.clone(),
        total_due,
        paid,
        crypto_paid: crypto_paid.round_up(precision),
        due: due_uncapped.max(Amount::ZERO),
        due_uncapped,
        overpaid_helper: (-due_uncapped).max(Amount::ZERO),
        network_fee: total_due - total_due_no_fee,
        minimum_total_due,
        tx_count,
        tx_required,
    })
}

/// Accounting for every supported payment method of the invoice.
pub fn calculate_all(
    invoice: &Invoice,
    handlers: &PaymentMethodHandlers,
    filter: Option<&dyn Fn(&Payment) -> bool>,
) -> Result<Vec<PaymentMethodAccounting>, AccountingError> {
    invoice
        .payment_methods
        .iter()
        .filter(|m| handlers.supports(&m.id))
        .map(|m| calculate(invoice, &m.id, handlers, filter))
        .collect()
}

/// The accounting of the payment method whose balance is closest to being exactly settled.
///
/// Returns `None` if the invoice offers no supported payment method.
pub fn nearest_cleared(
    invoice: &Invoice,
    handlers: &PaymentMethodHandlers,
    filter: Option<&dyn Fn(&Payment) -> bool>,
) -> Result<Option<PaymentMethodAccounting>, AccountingError> {
    let all = calculate_all(invoice, handlers, filter)?;
    Ok(all.into_iter().min_by_key(|a| a.due_uncapped.value().abs()))
}

/// Converts `amount`, denominated in the currency of `source`, into the currency of `target`.
///
/// The amount is first rounded half-up at the source asset's divisibility. If the methods differ, it is converted
/// through the invoice currency using the locked-in rates (`amount * source.rate / target.rate`) and rounded half-up
/// again at the target's divisibility.
fn value_in(
    amount: Amount,
    source: &PaymentMethod,
    target: &PaymentMethod,
    handlers: &PaymentMethodHandlers,
) -> Option<Amount> {
    let source_precision = handlers.divisibility(&source.id.crypto_code);
    let rounded = amount.round_half_up(source_precision);
    if source.id == target.id {
        return Some(rounded);
    }
    if target.rate.is_zero() {
        return Some(Amount::ZERO);
    }
    let target_precision = handlers.divisibility(&target.id.crypto_code);
    let fiat = rounded.checked_mul(source.rate)?;
    Some(fiat.checked_div(target.rate)?.round_half_up(target_precision))
}

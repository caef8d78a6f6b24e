//! The invoice state machine.
//!
//! [`update_invoice`] is a pure function of the invoice, the network parameters and the current time. It applies the
//! reconciliation rules one at a time, re-evaluating from the top after each one, until none applies. The watcher
//! persists the result and publishes one event per transition.
use chrono::{DateTime, Utc};
use log::*;

use crate::{
    accounting::{self, AccountingError, PaymentMethodAccounting},
    db_types::{Invoice, InvoiceExceptionStatus as X, InvoiceLog, InvoiceState, InvoiceStatus as S, Payment},
    payment_methods::PaymentMethodHandlers,
};

/// A single status change, in the order it was traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: InvoiceState,
    pub to: InvoiceState,
}

/// Everything one evaluation of the state machine decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub transitions: Vec<Transition>,
    pub logs: Vec<InvoiceLog>,
    /// The invoice no longer expects funds, so its addresses should stop routing notifications to it.
    pub unaffect_address: bool,
    /// The invoice reached a terminal state and should leave the pending set.
    pub stop_watching: bool,
    /// Accounting of the payment method closest to being settled, as of the final state.
    pub accounting: Option<PaymentMethodAccounting>,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        !self.transitions.is_empty()
    }

    pub fn final_state(&self) -> Option<InvoiceState> {
        self.transitions.last().map(|t| t.to)
    }
}

struct Step {
    to: InvoiceState,
    logs: Vec<InvoiceLog>,
    unaffect_address: bool,
}

impl Step {
    fn to(status: S, exception: X) -> Self {
        Self { to: InvoiceState::new(status, exception), logs: vec![], unaffect_address: false }
    }

    fn log(mut self, log: InvoiceLog) -> Self {
        self.logs.push(log);
        self
    }

    fn unaffect(mut self) -> Self {
        self.unaffect_address = true;
        self
    }
}

/// Runs the state machine on `invoice` until it settles, updating the invoice's state in place.
pub fn update_invoice(
    invoice: &mut Invoice,
    handlers: &PaymentMethodHandlers,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, AccountingError> {
    let mut outcome = ReconcileOutcome::default();
    // Every rule moves to a different state, so a run can never be longer than the number of states.
    let max_steps = InvoiceState::all().count();
    for _ in 0..max_steps {
        let Some(step) = next_step(invoice, handlers, now)? else {
            break;
        };
        let from = invoice.state();
        trace!("👁️ Invoice [{}] moves from {from} to {}", invoice.id, step.to);
        invoice.set_state(step.to);
        outcome.transitions.push(Transition { from, to: step.to });
        outcome.logs.extend(step.logs);
        outcome.unaffect_address |= step.unaffect_address;
    }
    outcome.stop_watching = is_terminal(invoice, now);
    outcome.accounting = accounting::nearest_cleared(invoice, handlers, None)?;
    Ok(outcome)
}

/// True once nothing more can happen to the invoice.
pub fn is_terminal(invoice: &Invoice, now: DateTime<Utc>) -> bool {
    match invoice.status {
        S::Complete => true,
        S::Invalid | S::Expired => invoice.is_monitoring_expired(now),
        _ => false,
    }
}

/// When the invoice should be looked at again even if nothing happens on chain.
pub fn next_check(invoice: &Invoice, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if is_terminal(invoice, now) {
        return None;
    }
    if invoice.status == S::New && !invoice.is_expired(now) {
        return Some(invoice.expiration_time);
    }
    match invoice.status {
        S::New | S::Paid | S::Expired | S::Invalid if !invoice.is_monitoring_expired(now) => {
            // Monitoring ends strictly after this instant
            Some(invoice.monitoring_expiration + chrono::Duration::milliseconds(1))
        },
        _ => None,
    }
}

fn next_step(
    invoice: &Invoice,
    handlers: &PaymentMethodHandlers,
    now: DateTime<Utc>,
) -> Result<Option<Step>, AccountingError> {
    let Some(accounting) = accounting::nearest_cleared(invoice, handlers, None)? else {
        return Ok(None);
    };
    let state = invoice.state();
    let paid_enough = accounting.is_paid_enough();
    let has_payments = accounting.paid.is_positive();
    let step = match state.status {
        S::New if invoice.is_expired(now) && !paid_enough => {
            let mut step = Step::to(S::Expired, state.exception_status).unaffect().log(InvoiceLog::info("Invoice expired"));
            if state.exception_status == X::PaidPartial {
                step = step.log(InvoiceLog::warning("Invoice expired with a partial payment"));
            }
            Some(step)
        },
        S::New if paid_enough => {
            let exception = if accounting.is_overpaid() { X::PaidOver } else { X::None };
            Some(Step::to(S::Paid, exception).unaffect().log(InvoiceLog::info("Invoice paid in full")))
        },
        S::Expired if paid_enough => {
            let exception = if accounting.is_overpaid() { X::PaidOver } else { X::PaidLate };
            (exception != state.exception_status).then(|| {
                Step::to(S::Expired, exception).unaffect().log(InvoiceLog::warning("Invoice was paid after expiration"))
            })
        },
        S::New | S::Expired => {
            let exception = if has_payments { X::PaidPartial } else { X::None };
            (exception != state.exception_status && state.exception_status != X::Marked)
                .then(|| Step::to(state.status, exception))
        },
        S::Paid => paid_step(invoice, &accounting, handlers, now)?,
        S::Confirmed => {
            let completed = filtered(invoice, &accounting, handlers, &|p: &Payment| {
                handlers.network(&p.payment_method_id.crypto_code).map(|n| p.data.completed(n)).unwrap_or(false)
            })?;
            (completed.paid >= accounting.minimum_total_due).then(|| {
                Step::to(S::Complete, state.exception_status).log(InvoiceLog::success("Invoice completed"))
            })
        },
        S::Complete | S::Invalid => None,
    };
    Ok(step)
}

fn paid_step(
    invoice: &Invoice,
    accounting: &PaymentMethodAccounting,
    handlers: &PaymentMethodHandlers,
    now: DateTime<Utc>,
) -> Result<Option<Step>, AccountingError> {
    let exception = invoice.exception_status;
    if !accounting.is_paid_enough() {
        let exception = if accounting.paid.is_positive() { X::PaidPartial } else { X::None };
        let log = InvoiceLog::warning("A payment was replaced, and the invoice is no longer paid in full");
        return Ok(Some(Step::to(S::New, exception).log(log)));
    }
    let expected = if accounting.is_overpaid() { X::PaidOver } else { X::None };
    if exception != expected && exception != X::Marked {
        return Ok(Some(Step::to(S::Paid, expected)));
    }
    let speed = invoice.speed_policy;
    let confirmed = filtered(invoice, accounting, handlers, &|p: &Payment| p.data.confirmed(speed))?;
    if invoice.is_monitoring_expired(now) && confirmed.paid < accounting.minimum_total_due {
        let log = InvoiceLog::error("Invoice failed to confirm in time");
        return Ok(Some(Step::to(S::Invalid, exception).unaffect().log(log)));
    }
    if confirmed.paid >= accounting.minimum_total_due {
        return Ok(Some(Step::to(S::Confirmed, exception).unaffect().log(InvoiceLog::info("Invoice confirmed"))));
    }
    Ok(None)
}

fn filtered(
    invoice: &Invoice,
    accounting: &PaymentMethodAccounting,
    handlers: &PaymentMethodHandlers,
    filter: &dyn Fn(&Payment) -> bool,
) -> Result<PaymentMethodAccounting, AccountingError> {
    accounting::calculate(invoice, &accounting.payment_method_id, handlers, Some(filter))
}

#[cfg(test)]
mod test {
    use chrono::{Duration, TimeZone};
    use cpg_common::Amount;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        db_types::{InvoiceId, PaymentMethod, PaymentMethodId, SpeedPolicy},
        payment_methods::{
            BitcoinLikeDetails,
            BitcoinLikePaymentData,
            NetworkFeeMode,
            OutPoint,
            PaymentData,
            PaymentMethodDetails,
        },
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn invoice(speed: SpeedPolicy) -> Invoice {
        let details = BitcoinLikeDetails::new("a1", "xpub", Decimal::ZERO).with_network_fee_mode(NetworkFeeMode::Never);
        Invoice {
            id: InvoiceId::from("inv1"),
            store_id: "store".into(),
            order_id: None,
            price: dec!(100),
            currency: "BTC".into(),
            invoice_time: t0(),
            expiration_time: t0() + Duration::minutes(15),
            monitoring_expiration: t0() + Duration::hours(1),
            speed_policy: speed,
            status: S::New,
            exception_status: X::None,
            archived: false,
            payment_tolerance: Decimal::ZERO,
            payment_methods: vec![PaymentMethod::new(
                PaymentMethodId::on_chain("BTC"),
                Decimal::ONE,
                PaymentMethodDetails::BitcoinLike(details),
            )],
            payments: vec![],
            addresses: vec![],
        }
    }

    fn pay(invoice: &mut Invoice, txid: &str, value: Decimal, confirmations: i64, rbf: bool) {
        let data = BitcoinLikePaymentData::new(OutPoint::new(txid, 0), "a1", Amount::new(value))
            .with_confirmations(confirmations)
            .with_rbf(rbf);
        let received = invoice.invoice_time + Duration::minutes(1 + invoice.payments.len() as i64);
        let payment =
            Payment::new(invoice.id.clone(), PaymentMethodId::on_chain("BTC"), received, PaymentData::BitcoinLike(data));
        invoice.payments.push(payment);
    }

    fn states(outcome: &ReconcileOutcome) -> Vec<(S, X)> {
        outcome.transitions.iter().map(|t| (t.to.status, t.to.exception_status)).collect()
    }

    #[test]
    fn nothing_happens_to_a_fresh_invoice() {
        let mut inv = invoice(SpeedPolicy::MediumSpeed);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert!(!outcome.changed());
        assert!(!outcome.stop_watching);
        assert_eq!(next_check(&inv, t0()), Some(inv.expiration_time));
    }

    #[test]
    fn high_speed_full_payment_confirms_in_one_run() {
        let mut inv = invoice(SpeedPolicy::HighSpeed);
        pay(&mut inv, "tx1", dec!(100), 0, false);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(states(&outcome), vec![(S::Paid, X::None), (S::Confirmed, X::None)]);
        assert_eq!(outcome.transitions[0].from, InvoiceState::default());
        assert!(outcome.unaffect_address);
        assert!(!outcome.stop_watching);
        assert_eq!(inv.status, S::Confirmed);
    }

    #[test]
    fn high_speed_waits_for_rbf_payments() {
        let mut inv = invoice(SpeedPolicy::HighSpeed);
        pay(&mut inv, "tx1", dec!(100), 0, true);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(states(&outcome), vec![(S::Paid, X::None)]);
    }

    #[test]
    fn confirmed_invoice_completes_after_six_confirmations() {
        let mut inv = invoice(SpeedPolicy::MediumSpeed);
        pay(&mut inv, "tx1", dec!(100), 6, false);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(states(&outcome), vec![(S::Paid, X::None), (S::Confirmed, X::None), (S::Complete, X::None)]);
        assert!(outcome.stop_watching);
        assert_eq!(next_check(&inv, t0()), None);
    }

    #[test]
    fn partial_payment() {
        let mut inv = invoice(SpeedPolicy::MediumSpeed);
        pay(&mut inv, "tx1", dec!(40), 0, false);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(states(&outcome), vec![(S::New, X::PaidPartial)]);
        assert!(!outcome.unaffect_address);
        assert_eq!(outcome.accounting.unwrap().due, Amount::from(60));
        pay(&mut inv, "tx2", dec!(60), 0, false);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(states(&outcome), vec![(S::Paid, X::None)]);
    }

    #[test]
    fn overpayment_is_flagged() {
        let mut inv = invoice(SpeedPolicy::LowSpeed);
        pay(&mut inv, "tx1", dec!(150), 1, false);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(states(&outcome), vec![(S::Paid, X::PaidOver)]);
        assert_eq!(outcome.accounting.unwrap().overpaid_helper, Amount::from(50));
    }

    #[test]
    fn unpaid_invoice_expires_and_is_dropped_after_monitoring() {
        let mut inv = invoice(SpeedPolicy::MediumSpeed);
        let after_expiry = t0() + Duration::minutes(20);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), after_expiry).unwrap();
        assert_eq!(states(&outcome), vec![(S::Expired, X::None)]);
        assert!(!outcome.stop_watching);
        assert_eq!(next_check(&inv, after_expiry), Some(inv.monitoring_expiration + Duration::milliseconds(1)));

        let after_monitoring = t0() + Duration::hours(2);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), after_monitoring).unwrap();
        assert!(!outcome.changed());
        assert!(outcome.stop_watching);
        assert_eq!(inv.status, S::Expired);
    }

    #[test]
    fn expiring_with_partial_payment_logs_a_warning() {
        let mut inv = invoice(SpeedPolicy::MediumSpeed);
        pay(&mut inv, "tx1", dec!(10), 0, false);
        update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(inv.exception_status, X::PaidPartial);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0() + Duration::minutes(20)).unwrap();
        assert_eq!(states(&outcome), vec![(S::Expired, X::PaidPartial)]);
        assert!(outcome.logs.iter().any(|l| l.severity == crate::db_types::LogSeverity::Warning));
    }

    #[test]
    fn late_payment() {
        let mut inv = invoice(SpeedPolicy::MediumSpeed);
        inv.status = S::Expired;
        pay(&mut inv, "tx1", dec!(100), 0, false);
        let now = t0() + Duration::minutes(30);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), now).unwrap();
        assert_eq!(states(&outcome), vec![(S::Expired, X::PaidLate)]);
        pay(&mut inv, "tx2", dec!(1), 0, false);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), now).unwrap();
        assert_eq!(states(&outcome), vec![(S::Expired, X::PaidOver)]);
    }

    #[test]
    fn unconfirmed_payment_is_invalid_after_monitoring() {
        let mut inv = invoice(SpeedPolicy::MediumSpeed);
        pay(&mut inv, "tx1", dec!(100), 0, false);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(states(&outcome), vec![(S::Paid, X::None)]);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0() + Duration::hours(2)).unwrap();
        assert_eq!(states(&outcome), vec![(S::Invalid, X::None)]);
        assert!(outcome.stop_watching);
    }

    #[test]
    fn replaced_payment_reverts_to_new() {
        let mut inv = invoice(SpeedPolicy::MediumSpeed);
        pay(&mut inv, "tx1", dec!(60), 0, true);
        pay(&mut inv, "tx2", dec!(40), 0, false);
        update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(inv.status, S::Paid);
        inv.payments[0].accounted = false;
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        assert_eq!(states(&outcome), vec![(S::New, X::PaidPartial)]);
    }

    #[test]
    fn every_transition_is_reported_in_order() {
        let mut inv = invoice(SpeedPolicy::MediumSpeed);
        pay(&mut inv, "tx1", dec!(100), 6, false);
        let outcome = update_invoice(&mut inv, &PaymentMethodHandlers::default(), t0()).unwrap();
        for pair in outcome.transitions.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
        assert_eq!(outcome.final_state(), Some(inv.state()));
    }
}

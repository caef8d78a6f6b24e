use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    cpe_api::errors::PaymentServiceError,
    db_types::{InvoiceId, InvoiceLog, Payment, PaymentMethod, PaymentMethodId},
    events::{EventProducers, PaymentReceivedEvent, PaymentSettledEvent},
    payment_methods::{NetworkFeeMode, PaymentData, PaymentMethodHandlers},
    traits::{InvoiceRepository, InvoiceRepositoryError},
};

/// `PaymentService` records payments against invoices and keeps their accounted flags up to date.
///
/// All methods are safe to call repeatedly with the same observation: the chain-watching layer delivers at least
/// once, and re-recording a payment is a no-op.
#[derive(Clone)]
pub struct PaymentService<R> {
    repo: R,
    handlers: PaymentMethodHandlers,
    producers: EventProducers,
}

impl<R> Debug for PaymentService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentService ({:?})", self.handlers)
    }
}

impl<R> PaymentService<R> {
    pub fn new(repo: R, handlers: PaymentMethodHandlers, producers: EventProducers) -> Self {
        Self { repo, handlers, producers }
    }

    pub fn handlers(&self) -> &PaymentMethodHandlers {
        &self.handlers
    }
}

impl<R> PaymentService<R>
where R: InvoiceRepository
{
    /// Records a payment observed on `crypto_code` for the invoice.
    ///
    /// Returns `None` without changing anything if the invoice does not exist, does not offer the payment's rail, or
    /// already has this payment.
    ///
    /// The payment, the bump of the invoice's next network fee (if its fee mode asks for it) and the audit log entry
    /// are written in one transaction. Once that is committed, a [`PaymentReceivedEvent`] is published, and if the
    /// payment is already settled under the invoice's speed policy (e.g. Lightning payments), so is a
    /// [`PaymentSettledEvent`]. A failed write leaves nothing behind, so the same observation can simply be retried.
    pub async fn add_payment(
        &self,
        invoice_id: &InvoiceId,
        received_time: DateTime<Utc>,
        data: PaymentData,
        crypto_code: &str,
        accounted: bool,
    ) -> Result<Option<Payment>, PaymentServiceError> {
        let Some(invoice) = self.repo.get_invoice(invoice_id, false).await? else {
            debug!("💰️ Payment {} refers to invoice [{invoice_id}], which does not exist", data.payment_id());
            return Ok(None);
        };
        let method_id = PaymentMethodId::new(crypto_code, data.payment_type());
        let method = match invoice.payment_method(&method_id) {
            Some(m) if self.handlers.supports(&m.id) => m,
            _ => {
                warn!(
                    "💰️ Payment {} was made with {method_id}, which invoice [{invoice_id}] does not support. Ignoring it.",
                    data.payment_id()
                );
                return Ok(None);
            },
        };
        let network_fee = self.handlers.next_network_fee(method);
        let payment = Payment::new(invoice_id.clone(), method_id.clone(), received_time, data)
            .with_network_fee(network_fee)
            .with_accounted(accounted);
        let bumped = self.bump_network_fee(method, crypto_code);
        let log = InvoiceLog::info(format!(
            "Payment {} of {} {} received on {}",
            payment.id,
            payment.data.value(),
            method_id.crypto_code,
            payment.data.destination()
        ));
        let payment = match self.repo.add_payment(&payment, bumped.as_ref(), &[log]).await {
            Ok(p) => p,
            Err(InvoiceRepositoryError::PaymentAlreadyRecorded(id)) => {
                debug!("💰️ Payment {id} has already been recorded for invoice [{invoice_id}]");
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        };
        info!("💰️ Payment {} of {} {} received for invoice [{invoice_id}]", payment.id, payment.data.value(), method_id);
        if let Some(fee) = bumped.as_ref().and_then(|m| m.details.as_bitcoin()).map(|d| d.next_network_fee) {
            debug!("💰️ Next network fee of {method_id} on invoice [{invoice_id}] raised to {fee}");
        }

        self.producers.publish_payment_received(PaymentReceivedEvent::new(invoice_id.clone(), payment.clone())).await;
        if payment.is_settled(invoice.speed_policy) {
            debug!("💰️ Payment {} is settled on arrival", payment.id);
            self.producers.publish_payment_settled(PaymentSettledEvent::new(invoice_id.clone(), payment.clone())).await;
        }
        Ok(Some(payment))
    }

    /// The payment method with its next network fee raised to a full transaction fee, if its fee mode starts charging
    /// once a first payment has arrived.
    fn bump_network_fee(&self, method: &PaymentMethod, crypto_code: &str) -> Option<PaymentMethod> {
        let details = method.details.as_bitcoin()?;
        let tx_fee = details.tx_fee(self.handlers.divisibility(crypto_code));
        if details.network_fee_mode != NetworkFeeMode::MultiplePaymentsOnly || details.next_network_fee >= tx_fee {
            return None;
        }
        let mut updated = method.clone();
        if let Some(d) = updated.details.as_bitcoin_mut() {
            d.next_network_fee = tx_fee;
        }
        Some(updated)
    }

    /// Persists new accounted flags and payment data for already recorded payments, in one batch.
    ///
    /// A [`PaymentSettledEvent`] is published for every payment that became settled, once the batch has been
    /// committed.
    pub async fn update_payments(&self, payments: &[Payment]) -> Result<Vec<Payment>, PaymentServiceError> {
        if payments.is_empty() {
            return Ok(vec![]);
        }
        let results = self.repo.update_payments(payments).await?;
        trace!("💰️ {} payments updated", results.len());
        let settled = results.iter().filter(|r| r.became_settled()).map(|r| r.updated.clone()).collect::<Vec<_>>();
        for payment in &settled {
            debug!("💰️ Payment {} on invoice [{}] is now settled", payment.id, payment.invoice_id);
            let event = PaymentSettledEvent::new(payment.invoice_id.clone(), payment.clone());
            self.producers.publish_payment_settled(event).await;
        }
        Ok(results.into_iter().map(|r| r.updated).collect())
    }
}

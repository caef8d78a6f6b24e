use std::fmt::Debug;

use chrono::Utc;
use log::*;
use rust_decimal::Decimal;

use crate::{
    accounting,
    cpe_api::{
        errors::{InvoiceFlowError, OperatorAction},
        exchange_objects::CurrencyPair,
        invoice_objects::{InvoiceAccounting, MethodAccounting, NewInvoice},
    },
    db_types::{
        Invoice,
        InvoiceExceptionStatus,
        InvoiceId,
        InvoiceLog,
        InvoiceState,
        InvoiceStatus,
        PaymentMethod,
    },
    events::{EventProducers, InvoiceDataChangedEvent, InvoiceNeedUpdateEvent, InvoiceStatusChangedEvent},
    payment_methods::PaymentMethodHandlers,
    traits::{ExchangeRates, InvoiceRepository},
};

/// `InvoiceFlowApi` is the operator-facing API: it opens invoices, answers queries about them and applies the manual
/// overrides a merchant is allowed to make.
///
/// Every override is checked against the legality predicates of [`InvoiceState`]. A rejected override returns
/// [`InvoiceFlowError::ConflictingState`] and leaves the invoice untouched.
pub struct InvoiceFlowApi<R, X> {
    repo: R,
    rates: X,
    handlers: PaymentMethodHandlers,
    producers: EventProducers,
}

impl<R, X> Debug for InvoiceFlowApi<R, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InvoiceFlowApi")
    }
}

impl<R, X> InvoiceFlowApi<R, X> {
    pub fn new(repo: R, rates: X, handlers: PaymentMethodHandlers, producers: EventProducers) -> Self {
        Self { repo, rates, handlers, producers }
    }
}

impl<R, X> InvoiceFlowApi<R, X>
where
    R: InvoiceRepository,
    X: ExchangeRates,
{
    /// Opens a new invoice in the `New` state.
    ///
    /// The rate of every payment method is locked in now, either from the request or from the latest bid rate. The
    /// invoice is saved with its deposit addresses, search terms and a creation log entry in one step, and is
    /// watched from then on.
    pub async fn create_invoice(&self, request: NewInvoice) -> Result<Invoice, InvoiceFlowError> {
        request.validate().map_err(InvoiceFlowError::InvalidRequest)?;
        let mut payment_methods = Vec::with_capacity(request.methods.len());
        for method in &request.methods {
            if !self.handlers.supports(&method.id) {
                return Err(InvoiceFlowError::UnsupportedPaymentMethod(method.id.clone()));
            }
            let rate = match method.rate {
                Some(rate) => rate,
                None if method.id.crypto_code.eq_ignore_ascii_case(&request.currency) => Decimal::ONE,
                None => {
                    let pair = CurrencyPair::new(method.id.crypto_code.as_str(), request.currency.as_str());
                    self.rates.fetch_bid_rate(&pair).await?.bid
                },
            };
            if rate <= Decimal::ZERO {
                return Err(InvoiceFlowError::InvalidRequest(format!("The rate for {} must be positive", method.id)));
            }
            let mut details = method.details.clone();
            if let Some(d) = details.as_bitcoin_mut() {
                d.next_network_fee = d.initial_network_fee(self.handlers.divisibility(&method.id.crypto_code));
            }
            payment_methods.push(PaymentMethod::new(method.id.clone(), rate, details));
        }
        let invoice_time = request.invoice_time.unwrap_or_else(Utc::now);
        let expiration_time = invoice_time + request.expiration;
        let invoice = Invoice {
            id: InvoiceId::random(),
            store_id: request.store_id,
            order_id: request.order_id,
            price: request.price,
            currency: request.currency.to_ascii_uppercase(),
            invoice_time,
            expiration_time,
            monitoring_expiration: expiration_time + request.monitoring,
            speed_policy: request.speed_policy,
            status: InvoiceStatus::New,
            exception_status: InvoiceExceptionStatus::None,
            archived: false,
            payment_tolerance: request.payment_tolerance,
            payment_methods,
            payments: vec![],
            addresses: vec![],
        };
        let logs = vec![InvoiceLog::info("Creation of invoice")];
        let invoice = self.repo.create_invoice(invoice, logs).await?;
        info!("🧾️ Invoice [{}] created for {} {} in store {}", invoice.id, invoice.price, invoice.currency, invoice.store_id);
        self.producers.publish_invoice_data_changed(InvoiceDataChangedEvent::new(invoice.id.clone(), invoice.state())).await;
        self.producers.publish_invoice_need_update(InvoiceNeedUpdateEvent::new(invoice.id.clone())).await;
        Ok(invoice)
    }

    /// Manually settles (`Complete`) or voids (`Invalid`) an invoice.
    ///
    /// The exception status becomes `Marked`, and the invoice is no longer watched. If the invoice changes state
    /// between the check and the write (e.g. the watcher saw a payment), nothing is written and `ConflictingState`
    /// is returned.
    pub async fn mark_invoice_status(&self, id: &InvoiceId, status: InvoiceStatus) -> Result<Invoice, InvoiceFlowError> {
        let invoice = self.fetch_existing(id).await?;
        let old_state = invoice.state();
        let (allowed, action) = match status {
            InvoiceStatus::Complete => (old_state.can_mark_complete(), OperatorAction::MarkComplete),
            InvoiceStatus::Invalid => (old_state.can_mark_invalid(), OperatorAction::MarkInvalid),
            s => return Err(InvoiceFlowError::InvalidRequest(format!("Invoices cannot be marked as {s}"))),
        };
        if !allowed {
            warn!("🧾️ Cannot {action} invoice [{id}] while it is {old_state}");
            return Err(InvoiceFlowError::ConflictingState { invoice_id: id.clone(), state: old_state, action });
        }
        let new_state = InvoiceState::new(status, InvoiceExceptionStatus::Marked);
        if !self.repo.transition_invoice_status(id, old_state, new_state).await? {
            let state = self.fetch_existing(id).await?.state();
            warn!("🧾️ Invoice [{id}] moved from {old_state} to {state} before it could be marked as {status}");
            return Err(InvoiceFlowError::ConflictingState { invoice_id: id.clone(), state, action });
        }
        self.repo.remove_pending_invoice(id).await?;
        self.repo.unaffect_address(id).await?;
        let log = InvoiceLog::warning(format!("Invoice marked as {status} by the merchant"));
        self.repo.add_invoice_logs(id, &[log]).await?;
        info!("🧾️ Invoice [{id}] marked as {status}. It was {old_state}");
        self.producers.publish_invoice_data_changed(InvoiceDataChangedEvent::new(id.clone(), new_state)).await;
        self.producers
            .publish_invoice_status_changed(InvoiceStatusChangedEvent::new(id.clone(), old_state, new_state))
            .await;
        self.fetch_existing(id).await
    }

    /// Checks that the invoice can be refunded, and records that a refund was started.
    ///
    /// Paying out the refund is up to the caller.
    pub async fn begin_refund(&self, id: &InvoiceId) -> Result<Invoice, InvoiceFlowError> {
        let invoice = self.fetch_existing(id).await?;
        let state = invoice.state();
        if !state.can_refund() {
            warn!("🧾️ Cannot refund invoice [{id}] while it is {state}");
            return Err(InvoiceFlowError::ConflictingState {
                invoice_id: id.clone(),
                state,
                action: OperatorAction::Refund,
            });
        }
        self.repo.add_invoice_logs(id, &[InvoiceLog::info("Refund initiated")]).await?;
        info!("🧾️ Refund started for invoice [{id}]");
        self.producers.publish_invoice_data_changed(InvoiceDataChangedEvent::new(id.clone(), state)).await;
        Ok(invoice)
    }

    /// Hides (or restores) an invoice in listings. Archiving does not stop the invoice from being watched.
    pub async fn archive_invoice(&self, id: &InvoiceId, archived: bool) -> Result<Invoice, InvoiceFlowError> {
        let invoice = self.fetch_existing(id).await?;
        if invoice.archived == archived {
            return Ok(invoice);
        }
        self.repo.set_archived(id, archived).await?;
        let message = if archived { "Invoice archived" } else { "Invoice unarchived" };
        self.repo.add_invoice_logs(id, &[InvoiceLog::info(message)]).await?;
        debug!("🧾️ Invoice [{id}] archived: {archived}");
        self.producers.publish_invoice_data_changed(InvoiceDataChangedEvent::new(id.clone(), invoice.state())).await;
        self.fetch_existing(id).await
    }

    pub async fn fetch_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, InvoiceFlowError> {
        let invoice = self.repo.get_invoice(id, true).await?;
        Ok(invoice)
    }

    /// Invoices having a search term (id, store, order id, address, transaction id...) that contains `text`.
    pub async fn search_invoices(&self, text: &str) -> Result<Vec<Invoice>, InvoiceFlowError> {
        let ids = self.repo.search_invoices(text).await?;
        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(invoice) = self.repo.get_invoice(&id, false).await? {
                result.push(invoice);
            }
        }
        Ok(result)
    }

    pub async fn invoice_logs(&self, id: &InvoiceId) -> Result<Vec<InvoiceLog>, InvoiceFlowError> {
        let logs = self.repo.fetch_invoice_logs(id).await?;
        Ok(logs)
    }

    /// The balance of the invoice in each of its payment methods.
    pub async fn invoice_accounting(&self, id: &InvoiceId) -> Result<InvoiceAccounting, InvoiceFlowError> {
        let invoice = self.fetch_existing(id).await?;
        let methods = accounting::calculate_all(&invoice, &self.handlers, None)?
            .iter()
            .filter_map(|a| {
                invoice
                    .payment_method(&a.payment_method_id)
                    .map(|m| MethodAccounting::new(a, m.details.destination().to_string(), m.rate))
            })
            .collect();
        Ok(InvoiceAccounting { invoice_id: invoice.id.clone(), state: invoice.state(), methods })
    }

    async fn fetch_existing(&self, id: &InvoiceId) -> Result<Invoice, InvoiceFlowError> {
        self.repo.get_invoice(id, true).await?.ok_or_else(|| InvoiceFlowError::InvoiceNotFound(id.clone()))
    }
}

//! Bringing recorded on-chain payments up to date with what the chain says about their transactions.
//!
//! Two transactions that spend a common input cannot both confirm. When an invoice holds payments from several such
//! transactions (an RBF replacement, or a plain double spend), only the transaction that is most likely to survive
//! keeps its payments accounted: the one with the most confirmations, then the most recently received, then the
//! highest txid. The result depends only on the data, never on the order it is processed in, so running the
//! resolution again changes nothing.
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    db_types::Payment,
    payment_methods::{OutPoint, PaymentMethodHandlers},
    traits::TransactionInfo,
};

/// The txids of the on-chain payments, sorted and without duplicates.
pub fn payment_txids(payments: &[Payment]) -> Vec<String> {
    let mut txids = payments
        .iter()
        .filter_map(|p| p.data.as_bitcoin().map(|d| d.outpoint.txid.clone()))
        .collect::<Vec<_>>();
    txids.sort();
    txids.dedup();
    txids
}

/// Updates confirmation counts and RBF flags, then resolves double spends.
///
/// Only the payments that actually changed are returned. Payments whose transaction is missing from `transactions`
/// are left alone. Confirmation counts stop being tracked once they reach the network's maximum.
pub fn refresh_payments(
    payments: &[Payment],
    transactions: &HashMap<String, TransactionInfo>,
    handlers: &PaymentMethodHandlers,
) -> Vec<Payment> {
    let mut refreshed = payments.to_vec();
    for payment in &mut refreshed {
        let max_tracked = handlers
            .network(&payment.payment_method_id.crypto_code)
            .map(|n| n.max_tracked_confirmation)
            .unwrap_or(crate::payment_methods::DEFAULT_MAX_TRACKED_CONFIRMATION);
        let Some(data) = payment.data.as_bitcoin_mut() else {
            continue;
        };
        let Some(tx) = transactions.get(&data.outpoint.txid) else {
            continue;
        };
        if data.confirmation_count < max_tracked {
            data.confirmation_count = tx.confirmations.max(0);
        }
        data.rbf = tx.rbf && tx.confirmations <= 0;
    }
    let resolved = resolve_double_spends(&refreshed, transactions);
    resolved.into_iter().zip(payments).filter(|(new, old)| new != *old).map(|(new, _)| new).collect()
}

/// Sets the accounted flag of every on-chain payment whose transaction is known.
///
/// Payments of the winning transaction in each group of conflicting transactions are accounted, the others are not.
/// A transaction with a negative confirmation count has been evicted and is never accounted.
pub fn resolve_double_spends(payments: &[Payment], transactions: &HashMap<String, TransactionInfo>) -> Vec<Payment> {
    let txids = payment_txids(payments).into_iter().filter(|t| transactions.contains_key(t)).collect::<Vec<_>>();
    let index = txids.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect::<HashMap<_, _>>();

    let mut groups = DisjointSet::new(txids.len());
    let mut spenders = HashMap::<&OutPoint, usize>::new();
    for (i, txid) in txids.iter().enumerate() {
        let Some(tx) = transactions.get(txid) else { continue };
        for input in &tx.inputs {
            match spenders.get(input) {
                Some(&other) => groups.union(i, other),
                None => {
                    spenders.insert(input, i);
                },
            }
        }
    }

    let mut latest_received: Vec<Option<DateTime<Utc>>> = vec![None; txids.len()];
    for payment in payments {
        if let Some(&i) = payment.data.as_bitcoin().and_then(|d| index.get(d.outpoint.txid.as_str())) {
            latest_received[i] = latest_received[i].max(Some(payment.received_time));
        }
    }
    let rank = |i: usize| {
        let confirmations = transactions.get(&txids[i]).map(|t| t.confirmations).unwrap_or_default();
        (confirmations, latest_received[i], txids[i].as_str())
    };
    let mut winners = HashMap::<usize, usize>::new();
    for i in 0..txids.len() {
        let root = groups.find(i);
        let best = winners.entry(root).or_insert(i);
        if rank(i) > rank(*best) {
            *best = i;
        }
    }

    payments
        .iter()
        .map(|payment| {
            let mut payment = payment.clone();
            let tx_index = payment.data.as_bitcoin().and_then(|d| index.get(d.outpoint.txid.as_str()).copied());
            if let Some(i) = tx_index {
                let confirmations = transactions.get(&txids[i]).map(|t| t.confirmations).unwrap_or_default();
                let root = groups.find(i);
                payment.accounted = confirmations >= 0 && winners.get(&root) == Some(&i);
            }
            payment
        })
        .collect()
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self { parent: (0..size).collect() }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[a.max(b)] = a.min(b);
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration, TimeZone};
    use cpg_common::Amount;

    use super::*;
    use crate::{
        db_types::{InvoiceId, PaymentMethodId},
        payment_methods::{BitcoinLikePaymentData, PaymentData},
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn payment(txid: &str, minutes: i64) -> Payment {
        let data = BitcoinLikePaymentData::new(OutPoint::new(txid, 0), "a1", Amount::from(50)).with_rbf(true);
        Payment::new(
            InvoiceId::from("inv"),
            PaymentMethodId::on_chain("BTC"),
            t0() + Duration::minutes(minutes),
            PaymentData::BitcoinLike(data),
        )
    }

    fn tx(txid: &str, confirmations: i64, inputs: &[(&str, u32)]) -> (String, TransactionInfo) {
        let info = TransactionInfo {
            txid: txid.to_string(),
            confirmations,
            inputs: inputs.iter().map(|(t, v)| OutPoint::new(*t, *v)).collect(),
            rbf: true,
            timestamp: t0(),
        };
        (txid.to_string(), info)
    }

    fn accounted(payments: &[Payment]) -> Vec<(String, bool)> {
        let mut result = payments.iter().map(|p| (p.id.clone(), p.accounted)).collect::<Vec<_>>();
        result.sort();
        result
    }

    #[test]
    fn more_confirmations_win_in_any_order() {
        let txs = HashMap::from([tx("a", 2, &[("funding", 0)]), tx("b", 0, &[("funding", 0)])]);
        let forward = vec![payment("a", 1), payment("b", 2)];
        let backward = vec![payment("b", 2), payment("a", 1)];
        let expected = vec![("a-0".to_string(), true), ("b-0".to_string(), false)];
        let first = resolve_double_spends(&forward, &txs);
        assert_eq!(accounted(&first), expected);
        assert_eq!(accounted(&resolve_double_spends(&backward, &txs)), expected);
        // idempotent
        assert_eq!(resolve_double_spends(&first, &txs), first);
    }

    #[test]
    fn most_recent_wins_on_equal_confirmations() {
        let txs = HashMap::from([tx("a", 0, &[("funding", 0)]), tx("b", 0, &[("funding", 0), ("other", 1)])]);
        let payments = vec![payment("a", 1), payment("b", 5)];
        let resolved = resolve_double_spends(&payments, &txs);
        assert_eq!(accounted(&resolved), vec![("a-0".to_string(), false), ("b-0".to_string(), true)]);
    }

    #[test]
    fn conflicts_are_transitive() {
        let txs = HashMap::from([
            tx("a", 0, &[("x", 0)]),
            tx("b", 0, &[("x", 0), ("y", 0)]),
            tx("c", 1, &[("y", 0)]),
            tx("d", 0, &[("z", 0)]),
        ]);
        let payments = vec![payment("a", 1), payment("b", 2), payment("c", 3), payment("d", 4)];
        let resolved = resolve_double_spends(&payments, &txs);
        assert_eq!(
            accounted(&resolved),
            vec![
                ("a-0".to_string(), false),
                ("b-0".to_string(), false),
                ("c-0".to_string(), true),
                ("d-0".to_string(), true)
            ]
        );
    }

    #[test]
    fn evicted_and_unknown_transactions() {
        let txs = HashMap::from([tx("a", -1, &[("x", 0)])]);
        let mut unknown = payment("b", 2);
        unknown.accounted = false;
        let resolved = resolve_double_spends(&[payment("a", 1), unknown.clone()], &txs);
        assert!(!resolved[0].accounted);
        assert_eq!(resolved[1], unknown);
    }

    #[test]
    fn refresh_tracks_confirmations_up_to_the_cap() {
        let handlers = PaymentMethodHandlers::default();
        let txs = HashMap::from([tx("a", 3, &[("x", 0)])]);
        let changed = refresh_payments(&[payment("a", 1)], &txs, &handlers);
        assert_eq!(changed.len(), 1);
        let data = changed[0].data.as_bitcoin().unwrap();
        assert_eq!(data.confirmation_count, 3);
        assert!(!data.rbf);
        // nothing left to do
        assert!(refresh_payments(&changed, &txs, &handlers).is_empty());

        let mut deep = payment("a", 1);
        deep.data.as_bitcoin_mut().unwrap().confirmation_count = 6;
        deep.data.as_bitcoin_mut().unwrap().rbf = false;
        let txs = HashMap::from([tx("a", 9, &[("x", 0)])]);
        assert!(refresh_payments(&[deep], &txs, &handlers).is_empty());
    }
}

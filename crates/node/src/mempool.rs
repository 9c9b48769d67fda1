//! The mempool: per-sender nonce queues with bounded capacity.
//!
//! Transactions are keyed by (sender, nonce), at most one per pair. Each
//! account holds a `ready` run of consecutive nonces and a `future` set
//! waiting for gaps to fill; commits prune by the highest included nonce.
//! The pool lives behind the node façade lock, so it needs no interior
//! locking of its own.

use std::collections::BTreeMap;

use tracing::debug;

use nhb_api::chain::SubmitOutcome;
use nhb_types::address::Address;
use nhb_types::amount::Amount;
use nhb_types::config::MempoolLimits;
use nhb_types::error::NodeError;
use nhb_types::tx::Transaction;

#[derive(Debug, Default)]
struct AccountQueue {
    /// Next nonce the chain will accept from this sender.
    base_nonce: u64,
    ready: BTreeMap<u64, Transaction>,
    future: BTreeMap<u64, Transaction>,
}

impl AccountQueue {
    fn new(base_nonce: u64) -> Self {
        AccountQueue {
            base_nonce,
            ..Default::default()
        }
    }

    fn next_ready_nonce(&self) -> u64 {
        self.base_nonce + self.ready.len() as u64
    }

    /// Promotes future entries that now extend the ready run.
    fn promote(&mut self) {
        loop {
            let wanted = self.next_ready_nonce();
            match self.future.remove(&wanted) {
                Some(tx) => {
                    self.ready.insert(wanted, tx);
                }
                None => break,
            }
        }
    }

    /// Drops everything below `new_base` and re-promotes. Returns the
    /// number of entries removed.
    fn prune(&mut self, new_base: u64) -> usize {
        if new_base <= self.base_nonce {
            return 0;
        }
        self.base_nonce = new_base;
        let mut removed = 0;
        for queue in [&mut self.ready, &mut self.future] {
            let stale: Vec<u64> = queue.range(..new_base).map(|(&n, _)| n).collect();
            for nonce in stale {
                queue.remove(&nonce);
                removed += 1;
            }
        }
        // A pruned ready run may have left a gap; demote everything past
        // the first missing nonce.
        let mut expected = self.base_nonce;
        let keys: Vec<u64> = self.ready.keys().copied().collect();
        for nonce in keys {
            if nonce == expected {
                expected += 1;
            } else if let Some(tx) = self.ready.remove(&nonce) {
                self.future.insert(nonce, tx);
            }
        }
        self.promote();
        removed
    }

    fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.future.is_empty()
    }

    fn len(&self) -> usize {
        self.ready.len() + self.future.len()
    }
}

/// The pending-transaction pool.
#[derive(Debug)]
pub struct Mempool {
    accounts: BTreeMap<Address, AccountQueue>,
    limits: MempoolLimits,
    total: usize,
}

impl Mempool {
    /// An empty pool under the given limits.
    pub fn new(limits: MempoolLimits) -> Self {
        Mempool {
            accounts: BTreeMap::new(),
            limits,
            total: 0,
        }
    }

    /// Total resident transactions.
    pub fn len(&self) -> usize {
        self.total
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Admits a transaction for `sender`, whose committed next nonce is
    /// `committed_nonce`.
    pub fn add(
        &mut self,
        sender: Address,
        tx: Transaction,
        committed_nonce: u64,
    ) -> Result<SubmitOutcome, NodeError> {
        let nonce = tx.header.nonce;
        if nonce < committed_nonce {
            return Ok(SubmitOutcome::AlreadyIncluded);
        }

        let queue = self
            .accounts
            .entry(sender)
            .or_insert_with(|| AccountQueue::new(committed_nonce));
        self.total -= queue.len();
        queue.prune(committed_nonce);
        self.total += queue.len();

        if queue.ready.contains_key(&nonce) || queue.future.contains_key(&nonce) {
            // At most one transaction per (sender, nonce); a duplicate
            // submission is a no-op.
            return Ok(SubmitOutcome::Accepted);
        }

        if !self.limits.unlimited && self.total >= self.limits.max_transactions {
            let new_price = tx.header.gas_price.clone();
            if !self.evict_lower_priority(&new_price) {
                debug!(target: "mempool", total = self.total, "pool full; submission rejected");
                return Err(NodeError::MempoolFull);
            }
        }

        let queue = self
            .accounts
            .entry(sender)
            .or_insert_with(|| AccountQueue::new(committed_nonce));
        if nonce == queue.next_ready_nonce() {
            queue.ready.insert(nonce, tx);
            queue.promote();
        } else {
            queue.future.insert(nonce, tx);
        }
        self.total += 1;
        Ok(SubmitOutcome::Accepted)
    }

    /// Evicts the lowest-gas-price entry if it prices below `floor`.
    /// Future entries are preferred victims, then the highest nonce.
    fn evict_lower_priority(&mut self, floor: &Amount) -> bool {
        let mut victim: Option<(Address, u64, bool, Amount)> = None;
        for (addr, queue) in &self.accounts {
            for (future, map) in [(true, &queue.future), (false, &queue.ready)] {
                for (&nonce, tx) in map {
                    let price = tx.header.gas_price.clone();
                    let better_victim = match &victim {
                        None => true,
                        Some((_, v_nonce, v_future, v_price)) => {
                            price < *v_price
                                || (price == *v_price && future && !*v_future)
                                || (price == *v_price && future == *v_future && nonce > *v_nonce)
                        }
                    };
                    if better_victim {
                        victim = Some((*addr, nonce, future, price));
                    }
                }
            }
        }
        match victim {
            Some((addr, nonce, _, price)) if price < *floor => {
                if let Some(queue) = self.accounts.get_mut(&addr) {
                    if queue.ready.remove(&nonce).is_some() || queue.future.remove(&nonce).is_some()
                    {
                        self.total -= 1;
                    }
                    // Removing from the middle of a ready run demotes its tail.
                    let tail: Vec<u64> =
                        queue.ready.range(nonce..).map(|(&n, _)| n).collect();
                    for n in tail {
                        if let Some(tx) = queue.ready.remove(&n) {
                            queue.future.insert(n, tx);
                        }
                    }
                    if queue.is_empty() {
                        self.accounts.remove(&addr);
                    }
                }
                debug!(target: "mempool", evicted = %addr, nonce, "evicted lowest-priority entry");
                true
            }
            _ => false,
        }
    }

    /// Selects up to `limit` ready transactions, nonce order per sender.
    pub fn select(&self, limit: usize) -> Vec<Transaction> {
        let mut selected = Vec::new();
        'outer: for queue in self.accounts.values() {
            for tx in queue.ready.values() {
                if selected.len() >= limit {
                    break 'outer;
                }
                selected.push(tx.clone());
            }
        }
        selected
    }

    /// Deep copy of every pending transaction, selection order first.
    pub fn snapshot(&self) -> Vec<Transaction> {
        let mut all = self.select(usize::MAX);
        for queue in self.accounts.values() {
            all.extend(queue.future.values().cloned());
        }
        all
    }

    /// Prunes entries included by a committed block: for each sender the
    /// new base nonce is one past the highest included nonce.
    pub fn prune_committed(&mut self, included: &BTreeMap<Address, u64>) {
        for (sender, max_nonce) in included {
            if let Some(queue) = self.accounts.get_mut(sender) {
                let removed = queue.prune(max_nonce + 1);
                self.total -= removed;
                if queue.is_empty() {
                    self.accounts.remove(sender);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nhb_types::amount::Amount;
    use nhb_types::tx::{TxHeader, TxPayload, TxSignature};

    fn tx(nonce: u64, gas_price: u64) -> Transaction {
        Transaction {
            header: TxHeader {
                chain_id: Amount::from(1u64),
                nonce,
                to: Address([9; 20]),
                value: Amount::from(1u64),
                data: vec![],
                gas_limit: 21_000,
                gas_price: Amount::from(gas_price),
                paymaster: None,
                intent_ref: vec![],
                intent_expiry: 0,
                merchant_addr: String::new(),
                device_id: String::new(),
                refund_of: String::new(),
            },
            payload: TxPayload::Transfer,
            signature: TxSignature::empty(),
            paymaster_signature: None,
        }
    }

    fn limits(max: usize) -> MempoolLimits {
        MempoolLimits {
            max_transactions: max,
            unlimited: false,
        }
    }

    #[test]
    fn nonce_gap_parks_in_future_until_filled() {
        let mut pool = Mempool::new(limits(100));
        let sender = Address([1; 20]);

        pool.add(sender, tx(0, 1), 0).unwrap();
        pool.add(sender, tx(2, 1), 0).unwrap();
        // Nonce 2 waits on the missing 1.
        assert_eq!(pool.select(10).len(), 1);

        pool.add(sender, tx(1, 1), 0).unwrap();
        let selected = pool.select(10);
        let nonces: Vec<u64> = selected.iter().map(|t| t.header.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2]);
    }

    #[test]
    fn included_nonce_reports_already_included() {
        let mut pool = Mempool::new(limits(100));
        let sender = Address([1; 20]);
        assert_eq!(
            pool.add(sender, tx(3, 1), 5).unwrap(),
            SubmitOutcome::AlreadyIncluded
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn overflow_evicts_lowest_gas_price() {
        let mut pool = Mempool::new(limits(3));
        for (i, price) in [(0u8, 5u64), (1, 2), (2, 7)] {
            pool.add(Address([i + 1; 20]), tx(0, price), 0).unwrap();
        }
        // A richer transaction displaces the price-2 entry.
        pool.add(Address([9; 20]), tx(0, 10), 0).unwrap();
        assert_eq!(pool.len(), 3);
        let prices: Vec<Amount> = pool
            .snapshot()
            .iter()
            .map(|t| t.header.gas_price.clone())
            .collect();
        assert!(!prices.contains(&Amount::from(2u64)));

        // A cheaper-than-everything transaction is refused outright.
        assert!(matches!(
            pool.add(Address([8; 20]), tx(0, 1), 0),
            Err(NodeError::MempoolFull)
        ));
    }

    #[test]
    fn unlimited_mode_never_evicts() {
        let mut pool = Mempool::new(MempoolLimits {
            max_transactions: 1,
            unlimited: true,
        });
        for i in 0u8..50 {
            pool.add(Address([i + 1; 20]), tx(0, 1), 0).unwrap();
        }
        assert_eq!(pool.len(), 50);
    }

    #[test]
    fn commit_prunes_included_and_repromotes() {
        let mut pool = Mempool::new(limits(100));
        let sender = Address([1; 20]);
        for nonce in 0..5 {
            pool.add(sender, tx(nonce, 1), 0).unwrap();
        }
        let mut included = BTreeMap::new();
        included.insert(sender, 2u64); // block included nonces 0..=2
        pool.prune_committed(&included);

        let nonces: Vec<u64> = pool.select(10).iter().map(|t| t.header.nonce).collect();
        assert_eq!(nonces, vec![3, 4]);
    }

    #[test]
    fn duplicate_pending_submission_is_noop() {
        let mut pool = Mempool::new(limits(100));
        let sender = Address([1; 20]);
        pool.add(sender, tx(0, 1), 0).unwrap();
        pool.add(sender, tx(0, 1), 0).unwrap();
        assert_eq!(pool.len(), 1);
    }
}

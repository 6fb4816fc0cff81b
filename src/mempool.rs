//! Fee-prioritized pool of pending transactions.
//!
//! The pool only ever holds transactions that could be mined on top of the
//! current head: signatures check out, the validity window covers the next
//! block height, and each sender can afford all of their pooled
//! transactions together at once. Whenever the head moves the pool is
//! re-validated against the new state; transactions knocked out by a
//! rebranch are re-admitted if they still apply.

use crate::blockchain::{Blockchain, HeadChangedEvent};
use crate::crypto::{Address, Hash};
use crate::transaction::Transaction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 50_000;

/// Outcome of offering a transaction to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Accepted,
    /// Already in the pool.
    Known,
    /// Fails verification, its validity window, or the sender's funds.
    Invalid,
    /// The pool is full and the fee does not beat the cheapest entry.
    FeeTooLow,
}

// Priority key: higher fee-per-byte first, hash as a deterministic
// tie-break. Derived lexicographic Ord makes the best transaction the
// smallest element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TxPriority {
    fee_per_byte: Reverse<u64>,
    hash: Hash,
}

impl TxPriority {
    fn of(tx: &Transaction) -> Self {
        TxPriority {
            fee_per_byte: Reverse(tx.fee_per_byte()),
            hash: tx.hash(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mempool {
    transactions: HashMap<Hash, Transaction>,
    ordered: BTreeSet<TxPriority>,
    by_sender: HashMap<Address, Vec<Hash>>,
    capacity: usize,
    min_fee_per_byte: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_limits(capacity, 0)
    }

    /// Pool with a capacity bound and a fee floor: transactions paying
    /// less than `min_fee_per_byte` are never admitted.
    pub fn with_limits(capacity: usize, min_fee_per_byte: u64) -> Self {
        Mempool {
            transactions: HashMap::new(),
            ordered: BTreeSet::new(),
            by_sender: HashMap::new(),
            capacity: capacity.max(1),
            min_fee_per_byte,
        }
    }

    /// Offer a transaction for inclusion. Validation runs against the
    /// chain's current head; `chain.height() + 1` is the height the
    /// transaction would be mined at.
    pub fn push_transaction(&mut self, transaction: Transaction, chain: &Blockchain) -> ReturnCode {
        if transaction.verify().is_err() {
            return ReturnCode::Invalid;
        }
        self.push_verified_transaction(transaction, chain)
    }

    /// Admission without the signature check, for callers that already
    /// verified the transaction before taking any locks.
    pub fn push_verified_transaction(
        &mut self,
        transaction: Transaction,
        chain: &Blockchain,
    ) -> ReturnCode {
        let hash = transaction.hash();
        if self.transactions.contains_key(&hash) {
            return ReturnCode::Known;
        }

        if transaction.fee_per_byte() < self.min_fee_per_byte {
            return ReturnCode::FeeTooLow;
        }

        let next_height = chain.height() + 1;
        if !transaction.is_valid_at(next_height) {
            return ReturnCode::Invalid;
        }

        let Ok(sender) = transaction.sender_address() else {
            return ReturnCode::Invalid;
        };
        let Ok(value) = transaction.total_value() else {
            return ReturnCode::Invalid;
        };

        // The sender must cover this transaction on top of everything they
        // already have pending, otherwise pool contents could conflict.
        let pending = self.pending_amount(&sender);
        let required = match pending.checked_add(value) {
            Some(required) => required,
            None => return ReturnCode::Invalid,
        };
        if !chain.get_account(&sender).can_spend(required, next_height) {
            debug!(
                tx = %transaction.hash_str(),
                "rejected: sender cannot cover pooled transactions"
            );
            return ReturnCode::Invalid;
        }

        if self.transactions.len() >= self.capacity {
            // Full pool: the newcomer must outbid the cheapest entry.
            let evict = match self.ordered.iter().next_back().copied() {
                Some(worst) if TxPriority::of(&transaction) < worst => worst,
                _ => return ReturnCode::FeeTooLow,
            };
            self.remove(&evict.hash);
        }

        self.ordered.insert(TxPriority::of(&transaction));
        self.by_sender.entry(sender).or_default().push(hash);
        self.transactions.insert(hash, transaction);
        ReturnCode::Accepted
    }

    pub fn get_transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.transactions.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.transactions.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Up to `max_count` transactions, best fee-per-byte first.
    pub fn get_transactions(&self, max_count: usize) -> Vec<Transaction> {
        self.ordered
            .iter()
            .take(max_count)
            .filter_map(|p| self.transactions.get(&p.hash))
            .cloned()
            .collect()
    }

    /// Drop every transaction paying less than `min_fee_per_byte`.
    pub fn evict_below_min_fee_per_byte(&mut self, min_fee_per_byte: u64) {
        let doomed: Vec<Hash> = self
            .ordered
            .iter()
            .filter(|p| p.fee_per_byte.0 < min_fee_per_byte)
            .map(|p| p.hash)
            .collect();
        for hash in doomed {
            self.remove(&hash);
        }
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<Transaction> {
        let transaction = self.transactions.remove(hash)?;
        self.ordered.remove(&TxPriority::of(&transaction));
        if let Ok(sender) = transaction.sender_address() {
            if let Some(hashes) = self.by_sender.get_mut(&sender) {
                hashes.retain(|h| h != hash);
                if hashes.is_empty() {
                    self.by_sender.remove(&sender);
                }
            }
        }
        Some(transaction)
    }

    /// Bring the pool back in line after a head change: drop transactions
    /// mined in adopted blocks, re-admit those from reverted blocks, and
    /// re-validate the rest against the new head state.
    pub fn on_head_changed(&mut self, event: &HeadChangedEvent, chain: &Blockchain) {
        for block in &event.adopted {
            for tx in &block.body.transactions {
                self.remove(&tx.hash());
            }
        }

        self.revalidate(chain);

        // Transactions undone by a rebranch compete for re-admission like
        // any fresh submission. Their signatures were checked when the
        // blocks holding them were verified.
        for block in &event.reverted {
            for tx in &block.body.transactions {
                self.push_verified_transaction(tx.clone(), chain);
            }
        }
    }

    fn revalidate(&mut self, chain: &Blockchain) {
        let next_height = chain.height() + 1;
        let mut spent: HashMap<Address, u64> = HashMap::new();
        let mut doomed: Vec<Hash> = Vec::new();

        // Best-first, so when a sender's funds run short the cheapest of
        // their transactions are the ones dropped.
        for priority in &self.ordered {
            let Some(tx) = self.transactions.get(&priority.hash) else {
                continue;
            };
            let valid = tx.is_valid_at(next_height)
                && match (tx.sender_address(), tx.total_value()) {
                    (Ok(sender), Ok(value)) => {
                        let used = spent.get(&sender).copied().unwrap_or(0);
                        let required = used.saturating_add(value);
                        if chain.get_account(&sender).can_spend(required, next_height) {
                            spent.insert(sender, required);
                            true
                        } else {
                            false
                        }
                    }
                    _ => false,
                };
            if !valid {
                doomed.push(priority.hash);
            }
        }

        for hash in doomed {
            debug!(tx = %hex::encode(hash), "dropped during head-change revalidation");
            self.remove(&hash);
        }
    }

    fn pending_amount(&self, sender: &Address) -> u64 {
        self.by_sender
            .get(sender)
            .into_iter()
            .flatten()
            .filter_map(|h| self.transactions.get(h))
            .filter_map(|tx| tx.total_value().ok())
            .fold(0u64, |sum, v| sum.saturating_add(v))
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Mempool::new()
    }
}

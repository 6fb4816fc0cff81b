//! Single-writer coordination of chain and mempool.
//!
//! `Consensus` owns the blockchain behind a `RwLock` and the mempool behind
//! a `Mutex` and keeps the two consistent: every head change produced by a
//! block push is replayed into the mempool before the push returns, under
//! the same write lock. Lock order is always chain first, mempool second.

use crate::accounts::{AccountsProof, AccountsTreeChunk};
use crate::account::Account;
use crate::block::Block;
use crate::blockchain::{Blockchain, HeadChangedEvent, PushResult, PushStats};
use crate::config::Config;
use crate::crypto::{Address, Hash};
use crate::error::ChainError;
use crate::mempool::{Mempool, ReturnCode};
use crate::persistence::{Database, InMemoryPersistence, Persistence};
use crate::transaction::Transaction;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;

pub struct Consensus {
    blockchain: Arc<RwLock<Blockchain>>,
    mempool: Arc<Mutex<Mempool>>,
    // Head-change events queued by the chain listener during a push; they
    // are drained into the mempool while the write lock is still held.
    pending_events: Arc<Mutex<VecDeque<HeadChangedEvent>>>,
}

impl Consensus {
    pub fn new(genesis_balances: &[(Address, u64)]) -> Self {
        Self::wrap(Blockchain::new(genesis_balances))
    }

    pub fn with_persistence(
        genesis_balances: &[(Address, u64)],
        persistence: Box<dyn Persistence>,
    ) -> Result<Self, ChainError> {
        Ok(Self::wrap(Blockchain::load(genesis_balances, persistence)?))
    }

    /// Build a node from its configuration: the configured persistence
    /// backend, the configured genesis balances and the mempool limits.
    pub fn from_config(config: &Config) -> Result<Self, ChainError> {
        let genesis_balances = config.genesis_balances()?;
        let persistence: Box<dyn Persistence> = if config.database.in_memory {
            Box::new(InMemoryPersistence::new())
        } else {
            Box::new(Database::open(&config.database.path)?)
        };
        let blockchain = Blockchain::load(&genesis_balances, persistence)?;
        let mempool = Mempool::with_limits(config.mempool.capacity, config.mempool.min_fee_per_byte);
        Ok(Self::wrap_with(blockchain, mempool))
    }

    fn wrap(blockchain: Blockchain) -> Self {
        Self::wrap_with(blockchain, Mempool::new())
    }

    fn wrap_with(mut blockchain: Blockchain, mempool: Mempool) -> Self {
        let pending_events: Arc<Mutex<VecDeque<HeadChangedEvent>>> =
            Arc::new(Mutex::new(VecDeque::new()));
        let sink = Arc::clone(&pending_events);
        blockchain.on_head_changed(move |event| sink.lock().push_back(event.clone()));

        Consensus {
            blockchain: Arc::new(RwLock::new(blockchain)),
            mempool: Arc::new(Mutex::new(mempool)),
            pending_events,
        }
    }

    /// Push a block through the single-writer path. Mempool consistency is
    /// restored before the lock is released, so no reader can observe a new
    /// head paired with a stale pool. A storage failure aborts the push
    /// with the chain and pool unchanged.
    pub fn push_block(&self, block: Block) -> Result<PushResult, ChainError> {
        let mut chain = self.blockchain.write();
        let result = chain.push_block(block)?;

        let events: Vec<HeadChangedEvent> = self.pending_events.lock().drain(..).collect();
        if !events.is_empty() {
            let mut mempool = self.mempool.lock();
            for event in &events {
                mempool.on_head_changed(event, &chain);
            }
        }
        Ok(result)
    }

    /// Offer a transaction. The signature check, by far the expensive part,
    /// runs exactly once and before any lock is taken; the contextual
    /// checks and insertion run under a chain read lock, which many
    /// submitters can hold at once.
    pub fn push_transaction(&self, transaction: Transaction) -> ReturnCode {
        if transaction.verify().is_err() {
            return ReturnCode::Invalid;
        }
        let chain = self.blockchain.read();
        let mut mempool = self.mempool.lock();
        mempool.push_verified_transaction(transaction, &chain)
    }

    /// Transactions a miner should include next, best fee-per-byte first.
    pub fn get_mineable_transactions(&self, max_count: usize) -> Vec<Transaction> {
        self.mempool.lock().get_transactions(max_count)
    }

    pub fn mempool_size(&self) -> usize {
        self.mempool.lock().len()
    }

    pub fn head(&self) -> Block {
        self.blockchain.read().head().clone()
    }

    pub fn head_hash(&self) -> Hash {
        self.blockchain.read().head_hash()
    }

    pub fn height(&self) -> u32 {
        self.blockchain.read().height()
    }

    pub fn total_work(&self) -> u128 {
        self.blockchain.read().total_work()
    }

    pub fn get_account(&self, address: &Address) -> Account {
        self.blockchain.read().get_account(address)
    }

    pub fn get_accounts_proof(&self, addresses: &[Address]) -> AccountsProof {
        self.blockchain.read().get_accounts_proof(addresses)
    }

    pub fn get_accounts_chunk(
        &self,
        start_prefix: &str,
        size: usize,
    ) -> Option<AccountsTreeChunk> {
        self.blockchain.read().get_accounts_chunk(start_prefix, size)
    }

    pub fn get_block(&self, hash: &Hash) -> Option<Block> {
        self.blockchain.read().get_block(hash).cloned()
    }

    pub fn get_block_at(&self, height: u32) -> Option<Block> {
        self.blockchain.read().get_block_at(height).cloned()
    }

    pub fn stats(&self) -> PushStats {
        self.blockchain.read().stats()
    }

    /// Shared handle to the underlying chain, for callers that need more
    /// than the convenience accessors.
    pub fn blockchain(&self) -> Arc<RwLock<Blockchain>> {
        Arc::clone(&self.blockchain)
    }

    pub fn mempool(&self) -> Arc<Mutex<Mempool>> {
        Arc::clone(&self.mempool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, GenesisBalance, GenesisConfig, MempoolConfig};
    use crate::crypto::KeyPair;
    use crate::test_helpers;

    #[test]
    fn test_push_block_updates_mempool() {
        let key = KeyPair::generate();
        let consensus = Consensus::new(&[(key.address(), 1_000)]);

        let tx = Transaction::sign(&key, [2u8; 20], 100, 10, 1).expect("sign");
        assert_eq!(
            consensus.push_transaction(tx.clone()),
            ReturnCode::Accepted
        );
        assert_eq!(consensus.mempool_size(), 1);

        let block = {
            let chain = consensus.blockchain();
            let chain = chain.read();
            test_helpers::next_block(&chain, vec![tx])
        };
        assert_eq!(consensus.push_block(block).expect("push"), PushResult::Extended);

        // The mined transaction left the pool before push_block returned.
        assert_eq!(consensus.mempool_size(), 0);
        assert_eq!(consensus.height(), 1);
    }

    #[test]
    fn test_transaction_against_stale_funds_rejected() {
        let key = KeyPair::generate();
        let consensus = Consensus::new(&[(key.address(), 100)]);

        // Drain the sender's balance on-chain first.
        let spend = Transaction::sign(&key, [2u8; 20], 90, 10, 1).expect("sign");
        let block = {
            let chain = consensus.blockchain();
            let chain = chain.read();
            test_helpers::next_block(&chain, vec![spend])
        };
        assert_eq!(consensus.push_block(block).expect("push"), PushResult::Extended);

        let late = Transaction::sign(&key, [3u8; 20], 50, 10, 1).expect("sign");
        assert_eq!(consensus.push_transaction(late), ReturnCode::Invalid);
    }

    #[test]
    fn test_rebranch_readmits_reverted_transactions() {
        let key = KeyPair::generate();
        let balances = [(key.address(), 1_000)];
        let consensus = Consensus::new(&balances);
        let mut fork_builder = Blockchain::new(&balances);

        // Mine a transaction on the main chain only.
        let tx = Transaction::sign(&key, [2u8; 20], 100, 10, 1).expect("sign");
        let main_one = {
            let chain = consensus.blockchain();
            let chain = chain.read();
            test_helpers::next_block_mined_by(&chain, vec![tx.clone()], [7u8; 20], 1)
        };
        assert_eq!(consensus.push_block(main_one).expect("push"), PushResult::Extended);

        // A heavier empty fork displaces it.
        let fork_one = test_helpers::next_block_mined_by(&fork_builder, Vec::new(), [8u8; 20], 2);
        fork_builder.push_block(fork_one.clone()).expect("push");
        let fork_two = test_helpers::next_block_mined_by(&fork_builder, Vec::new(), [8u8; 20], 2);
        fork_builder.push_block(fork_two.clone()).expect("push");

        assert_eq!(consensus.push_block(fork_one).expect("push"), PushResult::Forked);
        assert_eq!(
            consensus.push_block(fork_two).expect("push"),
            PushResult::Rebranched
        );

        // The reverted transaction is pending again and spendable.
        let mempool = consensus.mempool();
        assert!(mempool.lock().contains(&tx.hash()));
    }

    #[test]
    fn test_tampered_transaction_rejected() {
        let key = KeyPair::generate();
        let consensus = Consensus::new(&[(key.address(), 1_000)]);

        let mut tx = Transaction::sign(&key, [2u8; 20], 100, 10, 1).expect("sign");
        tx.value = 900;
        assert_eq!(consensus.push_transaction(tx), ReturnCode::Invalid);
        assert_eq!(consensus.mempool_size(), 0);
    }

    #[test]
    fn test_from_config_builds_a_configured_node() {
        let key = KeyPair::generate();
        let config = Config {
            database: DatabaseConfig {
                path: String::new(),
                in_memory: true,
            },
            mempool: MempoolConfig {
                capacity: 10,
                min_fee_per_byte: 5,
            },
            genesis: GenesisConfig {
                balances: vec![GenesisBalance {
                    address: hex::encode(key.address()),
                    balance: 100_000,
                }],
            },
        };

        let consensus = Consensus::from_config(&config).expect("config");
        assert_eq!(consensus.height(), 0);
        assert_eq!(consensus.get_account(&key.address()).balance(), 100_000);

        // The configured fee floor is live.
        let cheap = Transaction::sign(&key, [2u8; 20], 100, 0, 1).expect("sign");
        assert_eq!(consensus.push_transaction(cheap), ReturnCode::FeeTooLow);
        let rich = Transaction::sign(&key, [3u8; 20], 100, 10_000, 1).expect("sign");
        assert_eq!(consensus.push_transaction(rich), ReturnCode::Accepted);
    }
}

//! Fork-aware chain management.
//!
//! The chain keeps every known block in a fork tree and tracks the main
//! chain as the branch with the highest cumulative work. Pushing a block
//! either extends the main chain, parks a fork, or triggers a rebranch
//! when a fork overtakes the head. Account state always reflects the head
//! block and is moved atomically: a rebranch that fails to apply leaves
//! both the state and the head untouched. Durability comes first: every
//! push writes its rows to the persistence backend before any in-memory
//! state changes, and a storage failure aborts the push with an error.

use crate::accounts::{Accounts, AccountsProof, AccountsTreeChunk};
use crate::account::Account;
use crate::block::{Block, BlockBody, BlockHeader};
use crate::blockchain::core::chain_data::ChainData;
use crate::blockchain::core::validation::verify_block;
use crate::crypto::{Address, Hash};
use crate::error::ChainError;
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::policy;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Timestamp baked into the genesis block.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

// Hashes of blocks that failed validation are remembered so repeated
// pushes of the same bad block skip verification.
const INVALID_BLOCK_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(512) {
    Some(n) => n,
    None => unreachable!(),
};

/// Outcome of pushing a block into the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    /// The block was already known; nothing changed.
    Known,
    /// The block extends the current main chain head.
    Extended,
    /// The block extends a fork that does not (yet) outweigh the head.
    Forked,
    /// The block put a fork ahead of the main chain and the chain switched.
    Rebranched,
    /// The block's predecessor is unknown.
    Orphan,
    /// The block failed verification or contextual checks.
    Invalid,
    /// The block's declared accounts hash contradicts the recomputed state.
    Inconsistent,
}

/// Notification payload for head changes. `reverted` lists blocks undone
/// newest-first (empty unless a rebranch happened), `adopted` lists blocks
/// applied oldest-first.
#[derive(Debug, Clone)]
pub struct HeadChangedEvent {
    pub head_hash: Hash,
    pub reverted: Vec<Block>,
    pub adopted: Vec<Block>,
}

pub type HeadListener = Box<dyn Fn(&HeadChangedEvent) + Send + Sync>;

/// Counters over all `push_block` outcomes since startup.
#[derive(Debug, Default, Clone, Copy)]
pub struct PushStats {
    pub known: u64,
    pub extended: u64,
    pub forked: u64,
    pub rebranched: u64,
    pub orphaned: u64,
    pub invalid: u64,
    pub inconsistent: u64,
}

pub struct Blockchain {
    store: HashMap<Hash, ChainData>,
    main_index: HashMap<u32, Hash>,
    head_hash: Hash,
    head: Block,
    genesis_hash: Hash,
    accounts: Accounts,
    invalid_blocks: LruCache<Hash, ()>,
    listeners: Vec<HeadListener>,
    persistence: Box<dyn Persistence>,
    stats: PushStats,
}

impl Blockchain {
    /// Fresh, ephemeral chain over an in-memory persistence backend.
    pub fn new(genesis_balances: &[(Address, u64)]) -> Self {
        Self::assemble(genesis_balances, Box::new(InMemoryPersistence::new()))
    }

    /// Fresh chain writing through to `persistence`. The genesis block is
    /// made durable before the chain is handed out.
    pub fn with_persistence(
        genesis_balances: &[(Address, u64)],
        persistence: Box<dyn Persistence>,
    ) -> Result<Self, ChainError> {
        let chain = Self::assemble(genesis_balances, persistence);
        if let Some(data) = chain.store.get(&chain.genesis_hash) {
            chain
                .persistence
                .save_batch(&[(chain.genesis_hash, data.clone())], &chain.genesis_hash)?;
        }
        Ok(chain)
    }

    fn assemble(genesis_balances: &[(Address, u64)], persistence: Box<dyn Persistence>) -> Self {
        let accounts = Accounts::with_balances(genesis_balances);
        let genesis = Self::create_genesis_block(accounts.hash());
        let genesis_hash = genesis.hash();

        let mut store = HashMap::new();
        store.insert(genesis_hash, ChainData::initial(genesis.clone()));
        let mut main_index = HashMap::new();
        main_index.insert(0, genesis_hash);

        Blockchain {
            store,
            main_index,
            head_hash: genesis_hash,
            head: genesis,
            genesis_hash,
            accounts,
            invalid_blocks: LruCache::new(INVALID_BLOCK_CACHE_SIZE),
            listeners: Vec::new(),
            persistence,
            stats: PushStats::default(),
        }
    }

    /// Restore a chain from a persistence backend, falling back to a fresh
    /// genesis state when the backend is empty. The main chain is replayed
    /// from genesis to rebuild the account state.
    pub fn load(
        genesis_balances: &[(Address, u64)],
        persistence: Box<dyn Persistence>,
    ) -> Result<Self, ChainError> {
        let head_hash = match persistence.load_head()? {
            Some(hash) => hash,
            None => return Self::with_persistence(genesis_balances, persistence),
        };

        let entries = persistence.load_chain_data()?;
        let mut store = HashMap::new();
        for (hash, data) in entries {
            store.insert(hash, data);
        }

        let mut accounts = Accounts::with_balances(genesis_balances);
        let genesis = Self::create_genesis_block(accounts.hash());
        let genesis_hash = genesis.hash();
        if !store.contains_key(&genesis_hash) {
            return Err(ChainError::DatabaseError(
                "stored chain does not contain the expected genesis block".to_string(),
            ));
        }

        // Follow the successor pointers from genesis to the stored head and
        // replay every block over the genesis state.
        let mut main_index = HashMap::new();
        main_index.insert(0, genesis_hash);
        let mut cursor = genesis_hash;
        while cursor != head_hash {
            let successor = store
                .get(&cursor)
                .and_then(|d| d.main_chain_successor)
                .ok_or_else(|| {
                    ChainError::DatabaseError(
                        "stored head is not reachable from genesis".to_string(),
                    )
                })?;
            let data = store.get(&successor).ok_or_else(|| {
                ChainError::DatabaseError(format!(
                    "main chain successor {} missing from store",
                    hex::encode(successor)
                ))
            })?;
            accounts.commit_block(&data.block)?;
            main_index.insert(data.height(), successor);
            cursor = successor;
        }
        let head = store
            .get(&head_hash)
            .map(|d| d.block.clone())
            .ok_or_else(|| {
                ChainError::DatabaseError("stored head missing from store".to_string())
            })?;

        info!(
            height = head.height(),
            head = %hex::encode(head_hash),
            "restored chain from persistence"
        );

        Ok(Blockchain {
            store,
            main_index,
            head_hash,
            head,
            genesis_hash,
            accounts,
            invalid_blocks: LruCache::new(INVALID_BLOCK_CACHE_SIZE),
            listeners: Vec::new(),
            persistence,
            stats: PushStats::default(),
        })
    }

    fn create_genesis_block(accounts_hash: Hash) -> Block {
        let body = BlockBody {
            miner_address: [0u8; 20],
            transactions: Vec::new(),
        };
        Block {
            header: BlockHeader {
                height: 0,
                timestamp: GENESIS_TIMESTAMP,
                prev_hash: [0u8; 32],
                accounts_hash,
                body_hash: body.hash(),
                difficulty: policy::MIN_DIFFICULTY,
                nonce: 0,
            },
            body,
        }
    }

    /// Register a listener invoked synchronously, in registration order,
    /// every time the head changes and before `push_block` returns.
    pub fn on_head_changed<F>(&mut self, listener: F)
    where
        F: Fn(&HeadChangedEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn notify_head_changed(&self, event: &HeadChangedEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    /// Insert a block into the chain. This is the single entry point for
    /// new blocks; the outcome says how the chain reacted. A storage
    /// failure aborts the push before any in-memory state moved, so the
    /// call is safe to retry.
    pub fn push_block(&mut self, block: Block) -> Result<PushResult, ChainError> {
        let result = self.push_block_at(block, unix_time())?;
        match result {
            PushResult::Known => self.stats.known += 1,
            PushResult::Extended => self.stats.extended += 1,
            PushResult::Forked => self.stats.forked += 1,
            PushResult::Rebranched => self.stats.rebranched += 1,
            PushResult::Orphan => self.stats.orphaned += 1,
            PushResult::Invalid => self.stats.invalid += 1,
            PushResult::Inconsistent => self.stats.inconsistent += 1,
        }
        Ok(result)
    }

    fn push_block_at(&mut self, block: Block, now: u64) -> Result<PushResult, ChainError> {
        let hash = block.hash();

        if self.store.contains_key(&hash) {
            debug!(block = %hex::encode(hash), "push of known block ignored");
            return Ok(PushResult::Known);
        }
        if self.invalid_blocks.contains(&hash) {
            debug!(block = %hex::encode(hash), "push of known-invalid block ignored");
            return Ok(PushResult::Invalid);
        }

        if let Err(e) = verify_block(&block, now) {
            warn!(block = %hex::encode(hash), error = %e, "block failed verification");
            self.invalid_blocks.put(hash, ());
            return Ok(PushResult::Invalid);
        }

        let prev_data = match self.store.get(&block.header.prev_hash) {
            Some(data) => data,
            None => {
                debug!(
                    block = %hex::encode(hash),
                    prev = %hex::encode(block.header.prev_hash),
                    "orphan block, predecessor unknown"
                );
                return Ok(PushResult::Orphan);
            }
        };

        if let Err(e) = Self::verify_successor(&prev_data.block, &block) {
            warn!(block = %hex::encode(hash), error = %e, "block failed contextual checks");
            self.invalid_blocks.put(hash, ());
            return Ok(PushResult::Invalid);
        }

        let chain_data = prev_data.next(block);
        let head_work = self.head_total_work();

        if chain_data.block.header.prev_hash == self.head_hash {
            self.extend(hash, chain_data)
        } else if chain_data.total_work > head_work {
            self.store.insert(hash, chain_data);
            match self.rebranch(hash) {
                Ok(result) => Ok(result),
                Err(e) => {
                    // Nothing durable happened; drop the block so a retry
                    // replays the whole push.
                    self.store.remove(&hash);
                    Err(e)
                }
            }
        } else {
            // A fork at or below the head's work is parked, never adopted.
            // Ties deliberately keep the incumbent head.
            info!(
                block = %hex::encode(hash),
                height = chain_data.height(),
                "block creates or extends a fork"
            );
            self.persistence
                .save_batch(&[(hash, chain_data.clone())], &self.head_hash)?;
            self.store.insert(hash, chain_data);
            Ok(PushResult::Forked)
        }
    }

    /// Checks that need exactly the predecessor block: height continuity,
    /// monotonic timestamps and the per-block difficulty schedule.
    fn verify_successor(prev: &Block, block: &Block) -> Result<(), ChainError> {
        if block.height() != prev.height() + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "expected height {}, got {}",
                prev.height() + 1,
                block.height()
            )));
        }
        if block.header.timestamp <= prev.header.timestamp {
            return Err(ChainError::InvalidBlock(format!(
                "timestamp {} does not advance past predecessor's {}",
                block.header.timestamp, prev.header.timestamp
            )));
        }
        let expected = policy::next_difficulty(
            prev.header.difficulty,
            prev.header.timestamp,
            block.header.timestamp,
        );
        if block.header.difficulty != expected {
            return Err(ChainError::InvalidBlock(format!(
                "expected difficulty {}, got {}",
                expected, block.header.difficulty
            )));
        }
        Ok(())
    }

    fn extend(&mut self, hash: Hash, mut chain_data: ChainData) -> Result<PushResult, ChainError> {
        let mut accounts = self.accounts.clone();
        match accounts.commit_block(&chain_data.block) {
            Ok(()) => {}
            Err(ChainError::AccountsHashMismatch(msg)) => {
                warn!(block = %hex::encode(hash), %msg, "accounts hash mismatch on extend");
                self.invalid_blocks.put(hash, ());
                return Ok(PushResult::Inconsistent);
            }
            Err(e) => {
                warn!(block = %hex::encode(hash), error = %e, "state transition failed on extend");
                self.invalid_blocks.put(hash, ());
                return Ok(PushResult::Invalid);
            }
        }

        chain_data.on_main_chain = true;
        let height = chain_data.height();
        let prev_hash = chain_data.block.header.prev_hash;

        let mut updates = vec![(hash, chain_data.clone())];
        if let Some(prev) = self.store.get(&prev_hash) {
            let mut prev = prev.clone();
            prev.main_chain_successor = Some(hash);
            updates.push((prev_hash, prev));
        }
        // Durable first: a storage failure leaves head and state untouched.
        self.persistence.save_batch(&updates, &hash)?;

        self.accounts = accounts;
        for (update_hash, data) in updates {
            self.store.insert(update_hash, data);
        }
        self.main_index.insert(height, hash);
        self.head = chain_data.block;
        self.head_hash = hash;

        info!(
            height = self.head.height(),
            head = %hex::encode(hash),
            "extended main chain"
        );
        let event = HeadChangedEvent {
            head_hash: hash,
            reverted: Vec::new(),
            adopted: vec![self.head.clone()],
        };
        self.notify_head_changed(&event);
        Ok(PushResult::Extended)
    }

    /// Switch the main chain to the fork ending in `block_hash`. The fork's
    /// total work is already known to exceed the head's.
    fn rebranch(&mut self, block_hash: Hash) -> Result<PushResult, ChainError> {
        // Walk the fork back to the first block still on the main chain.
        let mut fork_chain: Vec<(Hash, Block)> = Vec::new();
        let mut cursor = block_hash;
        let ancestor = loop {
            match self.store.get(&cursor) {
                Some(data) if data.on_main_chain => break cursor,
                Some(data) => {
                    fork_chain.push((cursor, data.block.clone()));
                    cursor = data.block.header.prev_hash;
                }
                None => {
                    warn!(
                        block = %hex::encode(cursor),
                        "fork chain broken during rebranch"
                    );
                    return Ok(PushResult::Inconsistent);
                }
            }
        };
        fork_chain.reverse();

        // Roll the account state back to the common ancestor on a working
        // copy; the live state stays valid until the whole switch succeeds.
        let mut accounts = self.accounts.clone();
        let mut revert_chain: Vec<(Hash, Block)> = Vec::new();
        let mut cursor = self.head_hash;
        while cursor != ancestor {
            let block = match self.store.get(&cursor) {
                Some(data) => data.block.clone(),
                None => {
                    warn!(block = %hex::encode(cursor), "main chain broken during rebranch");
                    return Ok(PushResult::Inconsistent);
                }
            };
            if let Err(e) = accounts.revert_block(&block) {
                warn!(block = %hex::encode(cursor), error = %e, "failed to revert block");
                return Ok(PushResult::Inconsistent);
            }
            let parent = block.header.prev_hash;
            revert_chain.push((cursor, block));
            cursor = parent;
        }

        // Apply the fork on top of the ancestor state. A failing fork block
        // invalidates itself and everything built on it.
        for (i, (hash, block)) in fork_chain.iter().enumerate() {
            let failure = match accounts.commit_block(block) {
                Ok(()) => None,
                Err(ChainError::AccountsHashMismatch(msg)) => {
                    warn!(block = %hex::encode(*hash), %msg, "accounts hash mismatch on rebranch");
                    Some(PushResult::Inconsistent)
                }
                Err(e) => {
                    warn!(block = %hex::encode(*hash), error = %e, "fork block failed to apply");
                    Some(PushResult::Invalid)
                }
            };
            if let Some(result) = failure {
                for (bad_hash, _) in &fork_chain[i..] {
                    self.store.remove(bad_hash);
                    self.persistence.remove_chain_data(bad_hash)?;
                    self.invalid_blocks.put(*bad_hash, ());
                }
                return Ok(result);
            }
        }

        // Compute every row the switch touches and write them as one
        // durable batch before anything becomes visible in memory.
        let mut updated: HashMap<Hash, ChainData> = HashMap::new();
        for (hash, _) in &revert_chain {
            if let Some(data) = self.store.get(hash) {
                let mut data = data.clone();
                data.on_main_chain = false;
                data.main_chain_successor = None;
                updated.insert(*hash, data);
            }
        }
        let mut prev_hash = ancestor;
        for (hash, _) in &fork_chain {
            if let Some(mut prev) = updated
                .remove(&prev_hash)
                .or_else(|| self.store.get(&prev_hash).cloned())
            {
                prev.main_chain_successor = Some(*hash);
                updated.insert(prev_hash, prev);
            }
            if let Some(mut data) = updated
                .remove(hash)
                .or_else(|| self.store.get(hash).cloned())
            {
                data.on_main_chain = true;
                data.main_chain_successor = None;
                updated.insert(*hash, data);
            }
            prev_hash = *hash;
        }

        let updates: Vec<(Hash, ChainData)> = updated.into_iter().collect();
        self.persistence.save_batch(&updates, &block_hash)?;

        // The switch is durable, make it visible.
        self.accounts = accounts;
        for (hash, data) in updates {
            self.store.insert(hash, data);
        }
        for (_, block) in &revert_chain {
            self.main_index.remove(&block.height());
        }
        for (hash, block) in &fork_chain {
            self.main_index.insert(block.height(), *hash);
        }
        self.head_hash = block_hash;
        if let Some(data) = self.store.get(&block_hash) {
            self.head = data.block.clone();
        }

        info!(
            height = self.head.height(),
            head = %hex::encode(block_hash),
            reverted = revert_chain.len(),
            adopted = fork_chain.len(),
            "rebranched to heavier fork"
        );
        let event = HeadChangedEvent {
            head_hash: block_hash,
            reverted: revert_chain.into_iter().map(|(_, b)| b).collect(),
            adopted: fork_chain.into_iter().map(|(_, b)| b).collect(),
        };
        self.notify_head_changed(&event);
        Ok(PushResult::Rebranched)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn head(&self) -> &Block {
        &self.head
    }

    pub fn head_hash(&self) -> Hash {
        self.head_hash
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis_hash
    }

    pub fn height(&self) -> u32 {
        self.head.height()
    }

    /// Cumulative work of the main chain.
    pub fn total_work(&self) -> u128 {
        self.head_total_work()
    }

    fn head_total_work(&self) -> u128 {
        self.store
            .get(&self.head_hash)
            .map(|d| d.total_work)
            .unwrap_or(0)
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.store.contains_key(hash)
    }

    pub fn get_block(&self, hash: &Hash) -> Option<&Block> {
        self.store.get(hash).map(|d| &d.block)
    }

    pub fn get_chain_data(&self, hash: &Hash) -> Option<&ChainData> {
        self.store.get(hash)
    }

    /// Main chain block at the given height.
    pub fn get_block_at(&self, height: u32) -> Option<&Block> {
        self.main_index
            .get(&height)
            .and_then(|hash| self.store.get(hash))
            .map(|d| &d.block)
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    /// Account state for `address` at the current head.
    pub fn get_account(&self, address: &Address) -> Account {
        self.accounts.get(address)
    }

    pub fn get_accounts_proof(&self, addresses: &[Address]) -> AccountsProof {
        self.accounts.get_proof(addresses)
    }

    pub fn get_accounts_chunk(
        &self,
        start_prefix: &str,
        size: usize,
    ) -> Option<AccountsTreeChunk> {
        self.accounts.get_chunk(start_prefix, size)
    }

    pub fn stats(&self) -> PushStats {
        self.stats
    }
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

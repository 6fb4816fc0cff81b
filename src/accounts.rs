//! Account state: the Merkle radix trie and the block-level mutation layer.

pub mod chunk;
pub mod node;
pub mod partial;
pub mod proof;
pub mod tree;

pub use chunk::AccountsTreeChunk;
pub use partial::{ChunkStatus, PartialAccountsTree};
pub use proof::AccountsProof;
pub use tree::AccountsTree;

use crate::account::Account;
use crate::block::Block;
use crate::crypto::{Address, Hash};
use crate::error::ChainError;
use crate::policy;

/// Block-level view over the accounts tree.
///
/// Commits and reverts are atomic: every mutation runs against a working
/// copy of the tree, which replaces the live one only after all transfers
/// applied and the resulting root matched the block's accounts hash. A
/// failing block leaves the state untouched.
#[derive(Debug, Clone)]
pub struct Accounts {
    tree: AccountsTree,
}

impl Accounts {
    pub fn new() -> Self {
        Accounts {
            tree: AccountsTree::new(),
        }
    }

    /// State seeded with pre-funded balances, used for the genesis block.
    pub fn with_balances(balances: &[(Address, u64)]) -> Self {
        let mut tree = AccountsTree::new();
        for (address, balance) in balances {
            tree.put(address, Account::basic(*balance, 0));
        }
        Accounts { tree }
    }

    pub fn get(&self, address: &Address) -> Account {
        self.tree.get(address)
    }

    pub fn hash(&self) -> Hash {
        self.tree.root_hash()
    }

    pub fn num_accounts(&self) -> usize {
        self.tree.num_accounts()
    }

    pub fn get_proof(&self, addresses: &[Address]) -> AccountsProof {
        self.tree.get_proof(addresses)
    }

    pub fn get_chunk(&self, start_prefix: &str, size: usize) -> Option<AccountsTreeChunk> {
        self.tree.get_chunk(start_prefix, size)
    }

    pub fn tree(&self) -> &AccountsTree {
        &self.tree
    }

    /// Adopt a fully synced tree, e.g. one rebuilt from chunks.
    pub fn replace_tree(&mut self, tree: AccountsTree) {
        self.tree = tree;
    }

    /// Apply all transfers of `block` and the miner payout, then check the
    /// resulting root against the header's accounts hash.
    pub fn commit_block(&mut self, block: &Block) -> Result<(), ChainError> {
        let mut tree = self.tree.clone();
        Self::apply_block(&mut tree, block)?;
        if tree.root_hash() != block.header.accounts_hash {
            return Err(ChainError::AccountsHashMismatch(format!(
                "block {} declares {} but state computes {}",
                block.hash_str(),
                hex::encode(block.header.accounts_hash),
                hex::encode(tree.root_hash())
            )));
        }
        self.tree = tree;
        Ok(())
    }

    /// Undo `block`, restoring the state before it was committed. The live
    /// root must match the block's accounts hash, otherwise the block is
    /// not the most recent commit and reverting it would corrupt the state.
    pub fn revert_block(&mut self, block: &Block) -> Result<(), ChainError> {
        if self.tree.root_hash() != block.header.accounts_hash {
            return Err(ChainError::AccountsHashMismatch(format!(
                "block {} is not the latest commit",
                block.hash_str()
            )));
        }
        let mut tree = self.tree.clone();
        Self::undo_block(&mut tree, block)?;
        self.tree = tree;
        Ok(())
    }

    /// Root hash the tree would have after `block`, without committing.
    pub fn hash_with(&self, block: &Block) -> Result<Hash, ChainError> {
        let mut tree = self.tree.clone();
        Self::apply_block(&mut tree, block)?;
        Ok(tree.root_hash())
    }

    fn apply_block(tree: &mut AccountsTree, block: &Block) -> Result<(), ChainError> {
        let height = block.height();

        for tx in &block.body.transactions {
            let sender_address = tx.sender_address()?;
            let sender = tree
                .get(&sender_address)
                .apply_outgoing(tx.total_value()?, height)?;
            tree.put(&sender_address, sender);

            let recipient = tree.get(&tx.recipient).apply_incoming(tx.value)?;
            tree.put(&tx.recipient, recipient);
        }

        let payout = policy::block_reward_at(height)
            .checked_add(block.body.total_fees())
            .ok_or_else(|| {
                ChainError::InvalidBlock("miner payout overflows".to_string())
            })?;
        let miner = tree
            .get(&block.body.miner_address)
            .apply_incoming(payout)?;
        tree.put(&block.body.miner_address, miner);
        Ok(())
    }

    fn undo_block(tree: &mut AccountsTree, block: &Block) -> Result<(), ChainError> {
        let payout = policy::block_reward_at(block.height())
            .checked_add(block.body.total_fees())
            .ok_or_else(|| {
                ChainError::InvalidBlock("miner payout overflows".to_string())
            })?;
        let miner = tree
            .get(&block.body.miner_address)
            .revert_incoming(payout)?;
        tree.put(&block.body.miner_address, miner);

        // Transfers are undone in reverse application order.
        for tx in block.body.transactions.iter().rev() {
            let recipient = tree.get(&tx.recipient).revert_incoming(tx.value)?;
            tree.put(&tx.recipient, recipient);

            let sender_address = tx.sender_address()?;
            let sender = tree
                .get(&sender_address)
                .revert_outgoing(tx.total_value()?)?;
            tree.put(&sender_address, sender);
        }
        Ok(())
    }
}

impl Default for Accounts {
    fn default() -> Self {
        Accounts::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockBody, BlockHeader};
    use crate::crypto::KeyPair;
    use crate::transaction::Transaction;

    fn make_block(
        accounts: &Accounts,
        height: u32,
        miner: Address,
        transactions: Vec<Transaction>,
    ) -> Block {
        let body = BlockBody {
            miner_address: miner,
            transactions,
        };
        let mut block = Block {
            header: BlockHeader {
                height,
                timestamp: height as u64 * policy::BLOCK_TIME,
                prev_hash: [0u8; 32],
                accounts_hash: [0u8; 32],
                body_hash: body.hash(),
                difficulty: policy::MIN_DIFFICULTY,
                nonce: 0,
            },
            body,
        };
        block.header.accounts_hash = accounts
            .hash_with(&block)
            .expect("block must be applicable");
        block
    }

    #[test]
    fn test_commit_pays_miner() {
        let mut accounts = Accounts::new();
        let miner = [7u8; 20];
        let block = make_block(&accounts, 1, miner, Vec::new());
        accounts.commit_block(&block).expect("commit");
        assert_eq!(
            accounts.get(&miner).balance(),
            policy::block_reward_at(1)
        );
    }

    #[test]
    fn test_commit_is_atomic_on_hash_mismatch() {
        let mut accounts = Accounts::new();
        let before = accounts.hash();
        let mut block = make_block(&accounts, 1, [7u8; 20], Vec::new());
        block.header.accounts_hash = [0xab; 32];

        assert!(matches!(
            accounts.commit_block(&block),
            Err(ChainError::AccountsHashMismatch(_))
        ));
        assert_eq!(accounts.hash(), before);
        assert_eq!(accounts.num_accounts(), 0);
    }

    #[test]
    fn test_transfer_moves_value_and_fee() {
        let sender_key = KeyPair::generate();
        let sender = sender_key.address();
        let recipient = [3u8; 20];
        let miner = [7u8; 20];

        let mut accounts = Accounts::with_balances(&[(sender, 1_000)]);
        let tx = Transaction::sign(&sender_key, recipient, 600, 50, 1).expect("sign");
        let block = make_block(&accounts, 1, miner, vec![tx]);
        accounts.commit_block(&block).expect("commit");

        assert_eq!(accounts.get(&sender).balance(), 350);
        assert_eq!(accounts.get(&sender).nonce(), 1);
        assert_eq!(accounts.get(&recipient).balance(), 600);
        assert_eq!(
            accounts.get(&miner).balance(),
            policy::block_reward_at(1) + 50
        );
    }

    #[test]
    fn test_overspending_block_rejected_without_side_effects() {
        let sender_key = KeyPair::generate();
        let sender = sender_key.address();
        let mut accounts = Accounts::with_balances(&[(sender, 100)]);
        let before = accounts.hash();

        let tx = Transaction::sign(&sender_key, [3u8; 20], 600, 50, 1).expect("sign");
        let body = BlockBody {
            miner_address: [7u8; 20],
            transactions: vec![tx],
        };
        let block = Block {
            header: BlockHeader {
                height: 1,
                timestamp: policy::BLOCK_TIME,
                prev_hash: [0u8; 32],
                accounts_hash: [0u8; 32],
                body_hash: body.hash(),
                difficulty: policy::MIN_DIFFICULTY,
                nonce: 0,
            },
            body,
        };

        assert!(accounts.commit_block(&block).is_err());
        assert_eq!(accounts.hash(), before);
    }

    #[test]
    fn test_revert_restores_previous_state() {
        let sender_key = KeyPair::generate();
        let sender = sender_key.address();
        let mut accounts = Accounts::with_balances(&[(sender, 1_000)]);
        let before = accounts.hash();

        let tx = Transaction::sign(&sender_key, [3u8; 20], 600, 50, 1).expect("sign");
        let block = make_block(&accounts, 1, [7u8; 20], vec![tx]);
        accounts.commit_block(&block).expect("commit");
        assert_ne!(accounts.hash(), before);

        accounts.revert_block(&block).expect("revert");
        assert_eq!(accounts.hash(), before);
        assert_eq!(accounts.get(&sender).balance(), 1_000);
        assert_eq!(accounts.get(&sender).nonce(), 0);
    }

    #[test]
    fn test_revert_requires_matching_head_state() {
        let mut accounts = Accounts::new();
        let block_one = make_block(&accounts, 1, [7u8; 20], Vec::new());
        accounts.commit_block(&block_one).expect("commit");
        let block_two = make_block(&accounts, 2, [7u8; 20], Vec::new());
        accounts.commit_block(&block_two).expect("commit");

        // Reverting a non-head block must be refused.
        assert!(matches!(
            accounts.revert_block(&block_one),
            Err(ChainError::AccountsHashMismatch(_))
        ));
    }
}

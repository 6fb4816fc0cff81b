//! Incremental reconstruction of an accounts tree from chunks.
//!
//! A partial tree is seeded with the root hash it must converge to and fed
//! chunks in prefix order. Each chunk is verified against that root before
//! its accounts are inserted. The tree is complete once its own root hash
//! equals the expected one, which can only happen after every terminal has
//! been replayed.

use crate::accounts::tree::AccountsTree;
use crate::accounts::chunk::AccountsTreeChunk;
use crate::crypto::{address_from_hex, Hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// Chunk applied, the tree now matches the expected root.
    Complete,
    /// Chunk applied, more chunks are needed.
    Unfinished,
    /// Chunk proof commits to a different root than expected.
    RootMismatch,
    /// Chunk proof is inconsistent or the chunk is out of order.
    InvalidChunk,
}

#[derive(Debug)]
pub struct PartialAccountsTree {
    tree: AccountsTree,
    expected_root: Hash,
    last_prefix: String,
    complete: bool,
}

impl PartialAccountsTree {
    pub fn new(expected_root: Hash) -> Self {
        PartialAccountsTree {
            tree: AccountsTree::new(),
            expected_root,
            last_prefix: String::new(),
            complete: false,
        }
    }

    /// Apply the next chunk. Chunks must arrive in prefix order; the first
    /// terminal of each chunk has to lie strictly past everything applied
    /// so far.
    pub fn push_chunk(&mut self, chunk: &AccountsTreeChunk) -> ChunkStatus {
        if self.complete {
            return ChunkStatus::InvalidChunk;
        }
        if !chunk.verify() {
            return ChunkStatus::InvalidChunk;
        }
        if chunk.root_hash() != Some(self.expected_root) {
            return ChunkStatus::RootMismatch;
        }
        match chunk.head() {
            Some(head) if head.prefix() > self.last_prefix.as_str() => {}
            _ => return ChunkStatus::InvalidChunk,
        }

        for node in chunk.terminal_nodes() {
            let (Ok(address), Some(account)) =
                (address_from_hex(node.prefix()), node.account())
            else {
                return ChunkStatus::InvalidChunk;
            };
            self.tree.put(&address, account.clone());
        }

        if let Some(tail) = chunk.tail() {
            self.last_prefix = tail.prefix().to_string();
        }

        if self.tree.root_hash() == self.expected_root {
            self.complete = true;
            ChunkStatus::Complete
        } else {
            ChunkStatus::Unfinished
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Prefix of the last applied terminal; the next chunk must start past
    /// this.
    pub fn last_prefix(&self) -> &str {
        &self.last_prefix
    }

    /// The reconstructed tree, available once the expected root is reached.
    pub fn into_tree(self) -> Option<AccountsTree> {
        if self.complete {
            Some(self.tree)
        } else {
            None
        }
    }
}

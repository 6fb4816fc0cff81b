//! Block structure: header, body and the proof-of-work predicate.

use crate::crypto::{Address, Hash};
use crate::policy;
use crate::transaction::Transaction;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    pub height: u32,
    pub timestamp: u64,
    pub prev_hash: Hash,
    /// Root of the accounts tree after applying this block.
    pub accounts_hash: Hash,
    /// Merkle root over the block body.
    pub body_hash: Hash,
    pub difficulty: u64,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.prev_hash);
        hasher.update(self.accounts_hash);
        hasher.update(self.body_hash);
        hasher.update(self.difficulty.to_be_bytes());
        hasher.update(self.nonce.to_be_bytes());
        hasher.finalize().into()
    }

    /// Proof-of-work predicate over this header's hash and declared difficulty.
    pub fn verify_pow(&self) -> bool {
        policy::is_proof_of_work(&self.hash(), self.difficulty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockBody {
    pub miner_address: Address,
    pub transactions: Vec<Transaction>,
}

impl BlockBody {
    /// Merkle root over `[miner_address, tx...]`. Pairs are combined
    /// bottom-up; an odd node is carried up unchanged.
    pub fn hash(&self) -> Hash {
        let mut level: Vec<Hash> = Vec::with_capacity(self.transactions.len() + 1);
        level.push(Sha256::digest(self.miner_address).into());
        for tx in &self.transactions {
            level.push(tx.hash());
        }

        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            for pair in level.chunks(2) {
                if pair.len() == 2 {
                    let mut hasher = Sha256::new();
                    hasher.update(pair[0]);
                    hasher.update(pair[1]);
                    next.push(hasher.finalize().into());
                } else {
                    next.push(pair[0]);
                }
            }
            level = next;
        }
        level[0]
    }

    /// Sum of all transaction fees in this body.
    pub fn total_fees(&self) -> u64 {
        self.transactions.iter().fold(0u64, |sum, tx| sum.saturating_add(tx.fee))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{address_from_string, KeyPair};

    fn body_with_txs(count: usize) -> BlockBody {
        let keypair = KeyPair::generate();
        let transactions = (0..count)
            .map(|i| {
                Transaction::sign(
                    &keypair,
                    address_from_string("recipient"),
                    100 + i as u64,
                    1,
                    1,
                )
                .unwrap()
            })
            .collect();
        BlockBody {
            miner_address: address_from_string("miner"),
            transactions,
        }
    }

    #[test]
    fn test_body_hash_changes_with_transactions() {
        let empty = body_with_txs(0);
        let one = body_with_txs(1);
        assert_ne!(empty.hash(), one.hash());
    }

    #[test]
    fn test_body_hash_is_order_sensitive() {
        let mut body = body_with_txs(3);
        let original = body.hash();
        body.transactions.swap(0, 2);
        assert_ne!(original, body.hash());
    }

    #[test]
    fn test_header_hash_covers_nonce() {
        let body = body_with_txs(0);
        let mut header = BlockHeader {
            height: 1,
            timestamp: 1000,
            prev_hash: [0u8; 32],
            accounts_hash: [0u8; 32],
            body_hash: body.hash(),
            difficulty: 1,
            nonce: 0,
        };
        let h0 = header.hash();
        header.nonce = 1;
        assert_ne!(h0, header.hash());
    }

    #[test]
    fn test_difficulty_one_always_passes_pow() {
        let header = BlockHeader {
            height: 1,
            timestamp: 1000,
            prev_hash: [0u8; 32],
            accounts_hash: [0u8; 32],
            body_hash: [0u8; 32],
            difficulty: 1,
            nonce: 42,
        };
        assert!(header.verify_pow());
    }
}

//! Shared helpers for unit tests.

use crate::block::{Block, BlockBody, BlockHeader};
use crate::blockchain::Blockchain;
use crate::policy;
use crate::transaction::Transaction;

/// Build a valid block on top of the chain's head. The timestamp advances
/// by exactly the target block time, keeping the difficulty at the minimum
/// so any nonce satisfies the target.
pub fn next_block(chain: &Blockchain, transactions: Vec<Transaction>) -> Block {
    next_block_mined_by(chain, transactions, [7u8; 20], 0)
}

pub fn next_block_mined_by(
    chain: &Blockchain,
    transactions: Vec<Transaction>,
    miner_address: crate::crypto::Address,
    nonce: u64,
) -> Block {
    let parent = chain.head();
    let timestamp = parent.header.timestamp + policy::BLOCK_TIME;
    let body = BlockBody {
        miner_address,
        transactions,
    };
    let mut block = Block {
        header: BlockHeader {
            height: parent.height() + 1,
            timestamp,
            prev_hash: parent.hash(),
            accounts_hash: [0u8; 32],
            body_hash: body.hash(),
            difficulty: policy::next_difficulty(
                parent.header.difficulty,
                parent.header.timestamp,
                timestamp,
            ),
            nonce,
        },
        body,
    };
    block.header.accounts_hash = chain
        .accounts()
        .hash_with(&block)
        .expect("block must be applicable");
    block
}

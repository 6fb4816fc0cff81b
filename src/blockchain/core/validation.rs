//! Context-free block verification.
//!
//! Everything here can be checked from the block alone, without looking at
//! the chain: structural limits, the body binding, proof-of-work, and the
//! transactions' own validity. Contextual checks (height, predecessor,
//! difficulty, account balances) live in the chain itself.

use crate::block::Block;
use crate::error::ChainError;
use crate::policy;
use rayon::prelude::*;
use std::collections::HashSet;

/// Maximum serialized block size in bytes.
pub const MAX_BLOCK_SIZE: u64 = 1_000_000;

/// Verify everything about a block that does not require chain context.
/// `now` is the local wall-clock time in seconds, used for the timestamp
/// drift bound.
pub fn verify_block(block: &Block, now: u64) -> Result<(), ChainError> {
    if block.header.body_hash != block.body.hash() {
        return Err(ChainError::InvalidBlock(format!(
            "body hash mismatch in block {}",
            block.hash_str()
        )));
    }

    if block.header.timestamp > now + policy::ALLOWED_TIMESTAMP_DRIFT {
        return Err(ChainError::InvalidBlock(format!(
            "block {} timestamp {} too far in the future",
            block.hash_str(),
            block.header.timestamp
        )));
    }

    if block.header.difficulty < policy::MIN_DIFFICULTY {
        return Err(ChainError::InvalidBlock(format!(
            "difficulty {} below minimum",
            block.header.difficulty
        )));
    }

    // The genesis block is fixed by convention, not mined.
    if block.height() > 0 && !block.header.verify_pow() {
        return Err(ChainError::InvalidBlock(format!(
            "block {} does not satisfy its difficulty target",
            block.hash_str()
        )));
    }

    let size = bincode::serialized_size(block)?;
    if size > MAX_BLOCK_SIZE {
        return Err(ChainError::InvalidBlock(format!(
            "block size {} exceeds limit of {} bytes",
            size, MAX_BLOCK_SIZE
        )));
    }

    let mut seen = HashSet::with_capacity(block.body.transactions.len());
    for tx in &block.body.transactions {
        if !seen.insert(tx.hash()) {
            return Err(ChainError::InvalidBlock(format!(
                "duplicate transaction {} in block {}",
                tx.hash_str(),
                block.hash_str()
            )));
        }
        if !tx.is_valid_at(block.height()) {
            return Err(ChainError::InvalidBlock(format!(
                "transaction {} outside its validity window at height {}",
                tx.hash_str(),
                block.height()
            )));
        }
    }

    // Signature checks dominate verification cost, spread them over cores.
    block
        .body
        .transactions
        .par_iter()
        .map(|tx| tx.verify())
        .collect::<Result<Vec<_>, ChainError>>()?;

    Ok(())
}

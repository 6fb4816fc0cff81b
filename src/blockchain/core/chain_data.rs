//! Per-block bookkeeping for the fork tree.

use crate::block::Block;
use crate::crypto::Hash;
use crate::policy;
use serde::{Deserialize, Serialize};

/// A block plus its position in the fork tree. Every known block, main
/// chain or fork, has exactly one `ChainData` entry keyed by its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainData {
    pub block: Block,
    /// Cumulative difficulty from genesis up to and including this block.
    pub total_work: u128,
    pub on_main_chain: bool,
    /// Hash of the next main-chain block, set only while this block is on
    /// the main chain and not the head.
    pub main_chain_successor: Option<Hash>,
}

impl ChainData {
    pub fn initial(block: Block) -> Self {
        let total_work = policy::work_for_difficulty(block.header.difficulty);
        ChainData {
            block,
            total_work,
            on_main_chain: true,
            main_chain_successor: None,
        }
    }

    /// Chain data for a block extending `self`.
    pub fn next(&self, block: Block) -> Self {
        let total_work = self
            .total_work
            .saturating_add(policy::work_for_difficulty(block.header.difficulty));
        ChainData {
            block,
            total_work,
            on_main_chain: false,
            main_chain_successor: None,
        }
    }

    pub fn height(&self) -> u32 {
        self.block.height()
    }
}

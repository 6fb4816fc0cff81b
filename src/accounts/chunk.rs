//! Contiguous slices of the accounts tree used for state sync.
//!
//! A chunk carries a run of consecutive terminal nodes plus a Merkle proof
//! for the final one. The proof anchors the whole run to a root hash: a
//! verifier checks the proof, then checks that the loose terminals strictly
//! precede the proven tail in prefix order.

use crate::accounts::node::AccountsTreeNode;
use crate::accounts::proof::AccountsProof;
use crate::crypto::Hash;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsTreeChunk {
    nodes: Vec<AccountsTreeNode>,
    proof: AccountsProof,
}

impl AccountsTreeChunk {
    pub fn new(nodes: Vec<AccountsTreeNode>, proof: AccountsProof) -> Self {
        AccountsTreeChunk { nodes, proof }
    }

    /// Check the proof and the ordering of the loose terminal nodes. The
    /// run must be strictly increasing and end right before the tail.
    pub fn verify(&self) -> bool {
        if !self.proof.verify() {
            return false;
        }
        let Some(tail) = self.tail() else {
            return false;
        };
        let mut last_prefix = "";
        for node in &self.nodes {
            if !node.is_terminal() || node.prefix() <= last_prefix {
                return false;
            }
            last_prefix = node.prefix();
        }
        tail.is_terminal() && tail.prefix() > last_prefix
    }

    /// First terminal covered by the chunk.
    pub fn head(&self) -> Option<&AccountsTreeNode> {
        self.nodes.first().or_else(|| self.tail())
    }

    /// Last terminal covered by the chunk. The tail is part of the proof,
    /// which lists it first since proofs are post-order.
    pub fn tail(&self) -> Option<&AccountsTreeNode> {
        self.proof.nodes().first().filter(|n| n.is_terminal())
    }

    /// All terminals covered by the chunk, tail included, in prefix order.
    pub fn terminal_nodes(&self) -> Vec<&AccountsTreeNode> {
        let mut all: Vec<&AccountsTreeNode> = self.nodes.iter().collect();
        if let Some(tail) = self.tail() {
            all.push(tail);
        }
        all
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + usize::from(self.tail().is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Root hash the chunk's proof commits to.
    pub fn root_hash(&self) -> Option<Hash> {
        self.proof.root_hash()
    }
}

//! Merkle proofs over the accounts tree.
//!
//! A proof is a list of tree nodes in post-order: every node's children
//! appear before it, and the root node comes last. Verification replays
//! that order with a stack, checking each popped child against the hash its
//! parent records for it. A valid proof therefore binds every contained
//! node, terminal accounts included, to the root hash of its last node.

use crate::account::Account;
use crate::accounts::node::AccountsTreeNode;
use crate::crypto::{address_to_hex, Address, Hash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsProof {
    nodes: Vec<AccountsTreeNode>,
}

impl AccountsProof {
    pub fn new(nodes: Vec<AccountsTreeNode>) -> Self {
        AccountsProof { nodes }
    }

    pub fn nodes(&self) -> &[AccountsTreeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check the internal consistency of the proof: every non-root node must
    /// be consumed as a child of a later node, under the exact prefix and
    /// hash that parent records for it.
    pub fn verify(&self) -> bool {
        let mut stack: Vec<&AccountsTreeNode> = Vec::new();

        for node in &self.nodes {
            while stack.last().is_some_and(|child| child.is_child_of(node)) {
                let child = match stack.pop() {
                    Some(child) => child,
                    None => return false,
                };
                // The parent must record this child under its full prefix
                // with a hash matching the child's actual contents.
                let recorded = node.child_prefix(child.prefix());
                if recorded.as_deref() != Some(child.prefix()) {
                    return false;
                }
                if node.child_hash(child.prefix()) != Some(&child.hash()) {
                    return false;
                }
            }
            stack.push(node);
        }

        // Exactly the root node may remain.
        match stack.as_slice() {
            [root] => root.prefix().is_empty() && root.is_branch(),
            _ => false,
        }
    }

    /// Account proven for `address`, if the proof contains its terminal.
    /// Only meaningful after `verify` succeeded; a proof without a terminal
    /// for the address proves its absence instead.
    pub fn get_account(&self, address: &Address) -> Option<Account> {
        let prefix = address_to_hex(address);
        self.nodes
            .iter()
            .find(|n| n.is_terminal() && n.prefix() == prefix)
            .and_then(|n| n.account())
            .cloned()
    }

    /// Root hash the proof commits to. Only meaningful after `verify`.
    pub fn root_hash(&self) -> Option<Hash> {
        self.nodes.last().map(|n| n.hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::tree::AccountsTree;

    fn addr(byte: u8) -> Address {
        [byte; 20]
    }

    fn sample_tree() -> AccountsTree {
        let mut tree = AccountsTree::new();
        for i in 1..=6u8 {
            tree.put(&addr(i), Account::basic(i as u64 * 100, 0));
        }
        tree
    }

    #[test]
    fn test_proof_verifies_and_binds_root() {
        let tree = sample_tree();
        let proof = tree.get_proof(&[addr(2), addr(5)]);
        assert!(proof.verify());
        assert_eq!(proof.root_hash(), Some(tree.root_hash()));
        assert_eq!(proof.get_account(&addr(2)).map(|a| a.balance()), Some(200));
        assert_eq!(proof.get_account(&addr(5)).map(|a| a.balance()), Some(500));
    }

    #[test]
    fn test_proof_of_absence() {
        let tree = sample_tree();
        let proof = tree.get_proof(&[addr(9)]);
        assert!(proof.verify());
        assert_eq!(proof.root_hash(), Some(tree.root_hash()));
        assert!(proof.get_account(&addr(9)).is_none());
    }

    #[test]
    fn test_tampered_account_fails_verification() {
        let tree = sample_tree();
        let mut proof = tree.get_proof(&[addr(3)]);
        assert!(proof.verify());

        // Inflate the proven balance; the parent hash no longer matches.
        for node in &mut proof.nodes {
            if let AccountsTreeNode::Terminal { account, .. } = node {
                *account = Account::basic(1_000_000, 0);
            }
        }
        assert!(!proof.verify());
    }

    #[test]
    fn test_truncated_proof_fails_verification() {
        let tree = sample_tree();
        let mut proof = tree.get_proof(&[addr(1)]);
        assert!(proof.verify());
        proof.nodes.pop();
        assert!(!proof.verify());
    }

    #[test]
    fn test_empty_proof_is_invalid() {
        assert!(!AccountsProof::new(Vec::new()).verify());
    }
}

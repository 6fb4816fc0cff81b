//! The Merkle radix trie over all account states.
//!
//! Keys are 20-byte addresses encoded as 40 lowercase hex nibbles. The root
//! is always a branch node with the empty prefix; every branch (other than
//! the root) has at least two children, so the shape of the tree is a pure
//! function of the set of non-initial accounts stored in it. Two trees that
//! hold the same accounts hash to the same root no matter the order of
//! insertions and removals that produced them.

use crate::account::Account;
use crate::accounts::node::{common_prefix, AccountsTreeNode};
use crate::accounts::proof::AccountsProof;
use crate::accounts::chunk::AccountsTreeChunk;
use crate::crypto::{address_to_hex, Address, Hash};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct AccountsTree {
    // Nodes keyed by their full nibble prefix. BTreeMap ordering doubles as
    // the terminal-node iteration order used for chunking.
    store: BTreeMap<String, AccountsTreeNode>,
}

impl AccountsTree {
    pub fn new() -> Self {
        let mut store = BTreeMap::new();
        store.insert(String::new(), AccountsTreeNode::branch(String::new()));
        AccountsTree { store }
    }

    /// Account stored for `address`, or the initial account if none is.
    pub fn get(&self, address: &Address) -> Account {
        let key = address_to_hex(address);
        self.store
            .get(&key)
            .and_then(|n| n.account())
            .cloned()
            .unwrap_or_default()
    }

    /// Store `account` under `address`. Initial accounts are never stored;
    /// putting one removes any existing entry, so the tree only ever
    /// contains accounts that differ from the initial state.
    pub fn put(&mut self, address: &Address, account: Account) {
        let key = address_to_hex(address);
        if account.is_initial() {
            self.remove(&key);
        } else {
            self.insert(&key, account);
        }
    }

    pub fn root_hash(&self) -> Hash {
        match self.store.get("") {
            Some(root) => root.hash(),
            None => AccountsTreeNode::branch(String::new()).hash(),
        }
    }

    /// Number of non-initial accounts in the tree.
    pub fn num_accounts(&self) -> usize {
        self.store.values().filter(|n| n.is_terminal()).count()
    }

    fn insert(&mut self, prefix: &str, account: Account) {
        let mut root_path: Vec<AccountsTreeNode> = Vec::new();
        let mut node = match self.store.get("") {
            Some(root) => root.clone(),
            None => AccountsTreeNode::branch(String::new()),
        };

        loop {
            let common = common_prefix(node.prefix(), prefix).to_string();

            // The path diverges inside this node's prefix: split it by
            // inserting a new branch at the common prefix that holds both
            // the existing node and the new terminal.
            if common.len() != node.prefix().len() {
                let new_child = AccountsTreeNode::terminal(prefix.to_string(), account);
                let child_hash = new_child.hash();
                let new_parent = AccountsTreeNode::branch(common)
                    .with_child(node.prefix(), node.hash())
                    .with_child(prefix, child_hash);
                let parent_prefix = new_parent.prefix().to_string();
                let parent_hash = new_parent.hash();
                self.store.insert(prefix.to_string(), new_child);
                self.store.insert(parent_prefix.clone(), new_parent);
                self.update_keys(&parent_prefix, parent_hash, root_path);
                return;
            }

            // Exact match: overwrite the terminal in place.
            if node.is_terminal() && node.prefix() == prefix {
                let updated = AccountsTreeNode::terminal(prefix.to_string(), account);
                let hash = updated.hash();
                self.store.insert(prefix.to_string(), updated);
                self.update_keys(prefix, hash, root_path);
                return;
            }

            // Descend into the child on the path, or attach a new terminal
            // if no child occupies the slot.
            match node
                .child_prefix(prefix)
                .and_then(|cp| self.store.get(&cp).cloned())
            {
                Some(child) => {
                    root_path.push(node);
                    node = child;
                }
                None => {
                    let new_child = AccountsTreeNode::terminal(prefix.to_string(), account);
                    let child_hash = new_child.hash();
                    let node = node.with_child(prefix, child_hash);
                    let node_prefix = node.prefix().to_string();
                    let node_hash = node.hash();
                    self.store.insert(prefix.to_string(), new_child);
                    self.store.insert(node_prefix.clone(), node);
                    self.update_keys(&node_prefix, node_hash, root_path);
                    return;
                }
            }
        }
    }

    fn remove(&mut self, prefix: &str) {
        let mut root_path: Vec<AccountsTreeNode> = Vec::new();
        let mut node = match self.store.get("") {
            Some(root) => root.clone(),
            None => return,
        };

        while node.prefix() != prefix {
            match node
                .child_prefix(prefix)
                .filter(|cp| prefix.starts_with(cp.as_str()))
                .and_then(|cp| self.store.get(&cp).cloned())
            {
                Some(child) => {
                    root_path.push(node);
                    node = child;
                }
                // The address is not in the tree, nothing to do.
                None => return,
            }
        }
        if !node.is_terminal() {
            return;
        }

        self.store.remove(prefix);
        self.prune(prefix.to_string(), root_path);
    }

    /// Walk from the removed node towards the root, collapsing branches that
    /// lost their purpose: empty branches vanish, single-child branches are
    /// merged into their remaining child's path.
    fn prune(&mut self, prefix: String, mut root_path: Vec<AccountsTreeNode>) {
        let mut prefix = prefix;
        while let Some(node) = root_path.pop() {
            let node = node.without_child(&prefix);

            if node.has_single_child() && !node.prefix().is_empty() {
                self.store.remove(node.prefix());
                if let Some((child_prefix, child_hash)) = node.first_child() {
                    self.update_keys(&child_prefix, child_hash, root_path);
                }
                return;
            }

            if node.has_children() || node.prefix().is_empty() {
                let node_prefix = node.prefix().to_string();
                let node_hash = node.hash();
                self.store.insert(node_prefix.clone(), node);
                self.update_keys(&node_prefix, node_hash, root_path);
                return;
            }

            // Branch lost its last child, remove it and keep walking up.
            prefix = node.prefix().to_string();
            self.store.remove(&prefix);
        }
    }

    /// Propagate a changed child hash along the remaining path to the root.
    fn update_keys(&mut self, prefix: &str, hash: Hash, mut root_path: Vec<AccountsTreeNode>) {
        let mut prefix = prefix.to_string();
        let mut hash = hash;
        while let Some(node) = root_path.pop() {
            let node = node.with_child(&prefix, hash);
            prefix = node.prefix().to_string();
            hash = node.hash();
            self.store.insert(prefix.clone(), node);
        }
    }

    /// Merkle proof for a set of addresses. The proof covers present and
    /// absent addresses alike: for an absent address it contains the node
    /// whose prefix diverges from the address's path.
    pub fn get_proof(&self, addresses: &[Address]) -> AccountsProof {
        let mut prefixes: Vec<String> = addresses.iter().map(address_to_hex).collect();
        prefixes.sort();
        prefixes.dedup();
        self.get_proof_for_prefixes(&prefixes)
    }

    fn get_proof_for_prefixes(&self, prefixes: &[String]) -> AccountsProof {
        let mut nodes = Vec::new();
        if let Some(root) = self.store.get("") {
            self.collect_proof(root, prefixes, &mut nodes);
        }
        AccountsProof::new(nodes)
    }

    // Post-order collection: children are pushed before their parent, the
    // root node comes last. `prefixes` must be sorted.
    fn collect_proof(
        &self,
        node: &AccountsTreeNode,
        prefixes: &[String],
        nodes: &mut Vec<AccountsTreeNode>,
    ) -> bool {
        let mut include = false;
        let mut i = 0;
        while i < prefixes.len() {
            let prefix = &prefixes[i];
            let common = common_prefix(node.prefix(), prefix);

            // Either this node is the requested terminal, or its prefix
            // diverges from the requested path. In both cases the node
            // itself settles the query (presence or proven absence).
            if common.len() != node.prefix().len() || node.prefix() == prefix {
                include = true;
                i += 1;
                continue;
            }

            let child_prefix = node.child_prefix(prefix);
            match child_prefix
                .as_ref()
                .and_then(|cp| self.store.get(cp.as_str()))
            {
                Some(child) => {
                    // All consecutive prefixes routed through the same child
                    // are handled by a single recursive descent.
                    let mut j = i + 1;
                    while j < prefixes.len() && node.child_prefix(&prefixes[j]) == child_prefix {
                        j += 1;
                    }
                    include |= self.collect_proof(child, &prefixes[i..j], nodes);
                    i = j;
                }
                None => {
                    // No child on the path: this node proves the absence.
                    include = true;
                    i += 1;
                }
            }
        }

        if include {
            nodes.push(node.clone());
        }
        include
    }

    /// Terminal nodes with prefixes at or after `start_prefix`, in prefix
    /// order, capped at `size`.
    pub fn get_terminal_nodes(&self, start_prefix: &str, size: usize) -> Vec<AccountsTreeNode> {
        self.store
            .range(start_prefix.to_string()..)
            .map(|(_, n)| n)
            .filter(|n| n.is_terminal())
            .take(size)
            .cloned()
            .collect()
    }

    /// Chunk of up to `size` consecutive terminal nodes starting at
    /// `start_prefix`, anchored to the current root by a proof for the last
    /// node. Returns `None` if no terminal lies at or after `start_prefix`.
    pub fn get_chunk(&self, start_prefix: &str, size: usize) -> Option<AccountsTreeChunk> {
        let mut terminals = self.get_terminal_nodes(start_prefix, size);
        let last = terminals.pop()?;
        let proof = self.get_proof_for_prefixes(&[last.prefix().to_string()]);
        Some(AccountsTreeChunk::new(terminals, proof))
    }
}

impl Default for AccountsTree {
    fn default() -> Self {
        AccountsTree::new()
    }
}

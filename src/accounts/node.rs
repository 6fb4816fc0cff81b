//! Nodes of the accounts tree.
//!
//! A node is either a branch (a path prefix plus up to 16 children, one per
//! nibble) or a terminal (a full 40-nibble path plus an account). A node's
//! hash is a pure function of its canonical byte serialization; a branch
//! records each child's current hash, so any mutation below a node
//! invalidates every ancestor hash up to the root.

use crate::account::Account;
use crate::crypto::Hash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A branch child: the remaining path suffix below the branch prefix and the
/// child node's current hash. The child's full prefix is
/// `branch.prefix + suffix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchChild {
    pub suffix: String,
    pub hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountsTreeNode {
    Branch {
        prefix: String,
        children: [Option<BranchChild>; 16],
    },
    Terminal {
        prefix: String,
        account: Account,
    },
}

/// Longest common prefix of two nibble paths.
pub fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let len = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    &a[..len]
}

fn nibble_index(c: u8) -> Option<usize> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as usize),
        b'a'..=b'f' => Some((c - b'a' + 10) as usize),
        _ => None,
    }
}

impl AccountsTreeNode {
    pub fn terminal(prefix: String, account: Account) -> Self {
        AccountsTreeNode::Terminal { prefix, account }
    }

    pub fn branch(prefix: String) -> Self {
        AccountsTreeNode::Branch {
            prefix,
            children: Default::default(),
        }
    }

    pub fn prefix(&self) -> &str {
        match self {
            AccountsTreeNode::Branch { prefix, .. } => prefix,
            AccountsTreeNode::Terminal { prefix, .. } => prefix,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AccountsTreeNode::Terminal { .. })
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, AccountsTreeNode::Branch { .. })
    }

    pub fn account(&self) -> Option<&Account> {
        match self {
            AccountsTreeNode::Terminal { account, .. } => Some(account),
            AccountsTreeNode::Branch { .. } => None,
        }
    }

    /// Child slot index for a path passing through this node.
    /// `path` must start with this node's prefix and be strictly longer.
    fn child_index(&self, path: &str) -> Option<usize> {
        let pos = self.prefix().len();
        path.as_bytes().get(pos).copied().and_then(nibble_index)
    }

    /// Recorded hash of the child a path descends into, if any.
    pub fn child_hash(&self, path: &str) -> Option<&Hash> {
        match self {
            AccountsTreeNode::Branch { children, .. } => {
                let idx = self.child_index(path)?;
                children[idx].as_ref().map(|c| &c.hash)
            }
            AccountsTreeNode::Terminal { .. } => None,
        }
    }

    /// Full prefix of the child a path descends into, if such a child exists
    /// and its suffix actually lies on the path.
    pub fn child_prefix(&self, path: &str) -> Option<String> {
        match self {
            AccountsTreeNode::Branch { prefix, children } => {
                let idx = self.child_index(path)?;
                let child = children[idx].as_ref()?;
                Some(format!("{}{}", prefix, child.suffix))
            }
            AccountsTreeNode::Terminal { .. } => None,
        }
    }

    /// New node with the child at `child_prefix` set to `hash`.
    /// `child_prefix` is the child's full prefix. No-op on terminals.
    pub fn with_child(mut self, child_prefix: &str, hash: Hash) -> Self {
        if let AccountsTreeNode::Branch { prefix, children } = &mut self {
            let suffix = child_prefix[prefix.len()..].to_string();
            if let Some(idx) = suffix.as_bytes().first().copied().and_then(nibble_index) {
                children[idx] = Some(BranchChild { suffix, hash });
            }
        }
        self
    }

    /// New node without the child at `child_prefix`. No-op on terminals.
    pub fn without_child(mut self, child_prefix: &str) -> Self {
        if let AccountsTreeNode::Branch { prefix, children } = &mut self {
            let suffix = &child_prefix[prefix.len()..];
            if let Some(idx) = suffix.as_bytes().first().copied().and_then(nibble_index) {
                children[idx] = None;
            }
        }
        self
    }

    pub fn child_count(&self) -> usize {
        match self {
            AccountsTreeNode::Branch { children, .. } => {
                children.iter().filter(|c| c.is_some()).count()
            }
            AccountsTreeNode::Terminal { .. } => 0,
        }
    }

    pub fn has_children(&self) -> bool {
        self.child_count() > 0
    }

    pub fn has_single_child(&self) -> bool {
        self.child_count() == 1
    }

    /// Full prefix and recorded hash of the lowest-nibble child, if any.
    pub fn first_child(&self) -> Option<(String, Hash)> {
        match self {
            AccountsTreeNode::Branch { prefix, children } => children
                .iter()
                .flatten()
                .next()
                .map(|c| (format!("{}{}", prefix, c.suffix), c.hash)),
            AccountsTreeNode::Terminal { .. } => None,
        }
    }

    /// Full prefixes of all children, ordered by nibble value.
    pub fn child_prefixes(&self) -> Vec<String> {
        match self {
            AccountsTreeNode::Branch { prefix, children } => children
                .iter()
                .flatten()
                .map(|c| format!("{}{}", prefix, c.suffix))
                .collect(),
            AccountsTreeNode::Terminal { .. } => Vec::new(),
        }
    }

    /// Whether this node sits below `other` in the tree.
    pub fn is_child_of(&self, other: &AccountsTreeNode) -> bool {
        self.prefix() != other.prefix() && self.prefix().starts_with(other.prefix())
    }

    /// Canonical byte serialization used exclusively for hashing. The layout
    /// is fixed: type tag, prefix (length-prefixed), then the payload with
    /// children ordered by nibble value.
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            AccountsTreeNode::Terminal { prefix, account } => {
                out.push(0xff);
                out.push(prefix.len() as u8);
                out.extend_from_slice(prefix.as_bytes());
                account.serialize_content(&mut out);
            }
            AccountsTreeNode::Branch { prefix, children } => {
                out.push(0x00);
                out.push(prefix.len() as u8);
                out.extend_from_slice(prefix.as_bytes());
                out.push(self.child_count() as u8);
                for (idx, child) in children.iter().enumerate() {
                    if let Some(child) = child {
                        out.push(idx as u8);
                        out.push(child.suffix.len() as u8);
                        out.extend_from_slice(child.suffix.as_bytes());
                        out.extend_from_slice(&child.hash);
                    }
                }
            }
        }
        out
    }

    pub fn hash(&self) -> Hash {
        Sha256::digest(self.serialize_content()).into()
    }
}

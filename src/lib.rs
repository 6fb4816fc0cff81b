//! HelixChain - proof-of-work blockchain state core
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Fork tracking, block validation and rebranching
//! - [`block`] - Block structure and proof-of-work checks
//! - [`transaction`] - Transaction types and validation
//! - [`mempool`] - Fee-prioritized pending transaction pool
//!
//! ## Account State
//! - [`account`] - Account kinds (basic / vesting / HTLC)
//! - [`accounts`] - Merkle radix trie over addresses, proofs and chunks
//!
//! ## Consensus
//! - [`consensus`] - Single-writer wrapper over chain + mempool
//! - [`policy`] - Network constants, difficulty and reward rules
//!
//! ## Cryptography
//! - [`crypto`] - Hashing, keys, signatures (secp256k1)
//!
//! ## State Management
//! - [`persistence`] - Database layer (SQLite)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod block;
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Account State
// ============================================================================
pub mod account;
pub mod accounts;

// ============================================================================
// Consensus
// ============================================================================
pub mod consensus;
pub mod policy;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod test_helpers;
